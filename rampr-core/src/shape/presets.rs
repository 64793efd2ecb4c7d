use super::StageDef;

/// Built-in load shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Preset {
    /// Warm-up, stepped stress up to 30 users, failure observation and cool-down (17 min).
    Standard,
    /// Slow 2 → 8 user steps with a hold after every ramp, for struggling servers (12 min).
    Conservative,
    /// Fast 5 → 50 user ramps to find limits quickly (10 min).
    Aggressive,
}

impl Preset {
    pub fn stages(self) -> Vec<StageDef> {
        let table: &[(&str, f64, u64, f64)] = match self {
            Self::Standard => &[
                ("Stage 1: Warm-up (5 users)", 120.0, 5, 1.0),
                ("Stage 2: Baseline (5 users)", 240.0, 5, 1.0),
                ("Stage 3: Light Stress (10 users)", 360.0, 10, 1.0),
                ("Stage 4: Medium Load Hold (10 users)", 480.0, 10, 1.0),
                ("Stage 5: Heavy Stress (20 users)", 600.0, 20, 2.0),
                ("Stage 6: Peak Load Hold (20 users)", 720.0, 20, 2.0),
                ("Stage 7: Breaking Point (30 users)", 840.0, 30, 2.0),
                ("Stage 8: Failure Observation (30 users)", 960.0, 30, 2.0),
                ("Stage 9: Cool Down (5 users)", 1020.0, 5, 3.0),
            ],
            Self::Conservative => &[
                ("Stage 1: Ramp (2 users)", 60.0, 2, 1.0),
                ("Stage 1: Hold (2 users)", 180.0, 2, 1.0),
                ("Stage 2: Ramp (3 users)", 240.0, 3, 1.0),
                ("Stage 2: Hold (3 users)", 360.0, 3, 1.0),
                ("Stage 3: Ramp (5 users)", 420.0, 5, 1.0),
                ("Stage 3: Hold (5 users)", 540.0, 5, 1.0),
                ("Stage 4: Ramp (8 users)", 600.0, 8, 1.0),
                ("Stage 4: Hold (8 users)", 720.0, 8, 1.0),
            ],
            Self::Aggressive => &[
                ("Quick Start (5 users)", 60.0, 5, 2.0),
                ("Quick Start Hold (5 users)", 150.0, 5, 2.0),
                ("Rapid Ramp (15 users)", 210.0, 15, 3.0),
                ("Rapid Hold (15 users)", 300.0, 15, 3.0),
                ("Heavy Push (30 users)", 360.0, 30, 5.0),
                ("Heavy Hold (30 users)", 450.0, 30, 5.0),
                ("Breaking Point (50 users)", 510.0, 50, 10.0),
                ("Observation (50 users)", 600.0, 50, 10.0),
            ],
        };

        table
            .iter()
            .map(|&(label, end, users, rate)| StageDef::new(label, end, users, rate))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::extract_concurrency;
    use crate::shape::StagePlan;
    use strum::IntoEnumIterator as _;

    #[test]
    fn presets_are_well_formed() {
        for preset in Preset::iter() {
            let stages = preset.stages();
            for s in &stages {
                assert_eq!(
                    extract_concurrency(&s.label),
                    Some(s.target_concurrency),
                    "{preset}: {}",
                    s.label
                );
            }
            let plan = StagePlan::new(stages).unwrap_or_else(|e| panic!("{e}"));
            assert!(plan.issues().is_empty(), "{preset}: {:?}", plan.issues());
        }
    }

    #[test]
    fn preset_names_parse() {
        assert_eq!("standard".parse::<Preset>().ok(), Some(Preset::Standard));
        assert_eq!("aggressive".parse::<Preset>().ok(), Some(Preset::Aggressive));
        assert!("nope".parse::<Preset>().is_err());
        assert_eq!(Preset::Conservative.to_string(), "conservative");
    }

    #[test]
    fn standard_preset_runs_seventeen_minutes() {
        let plan = StagePlan::new(Preset::Standard.stages()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(plan.total_duration_seconds(), 1020.0);
        assert_eq!(plan.max_concurrency(), 30);
    }
}
