use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use bytes::Bytes;
use rand::Rng as _;

use crate::http::HttpRequest;
use crate::shape_file::TargetSpec;

/// One request body plus the size sample extracted from it, if configured.
#[derive(Debug, Clone)]
pub(crate) struct RequestBody {
    pub bytes: Bytes,
    pub size_sample: Option<Arc<str>>,
}

/// Everything a virtual user needs to issue a request to one target.
#[derive(Debug)]
pub(crate) struct RequestTemplate {
    pub name: Option<Arc<str>>,
    pub url: String,
    pub request: HttpRequest,
    bodies: Vec<RequestBody>,
    next: AtomicUsize,
}

impl RequestTemplate {
    pub(crate) async fn load(spec: &TargetSpec) -> anyhow::Result<Self> {
        let request = HttpRequest::new(&spec.method, &spec.url, &spec.headers, spec.timeout)
            .with_context(|| format!("invalid target `{}`", spec.url))?;
        let name: Option<Arc<str>> = spec.name.as_deref().map(Arc::from);

        let mut raw = Vec::with_capacity(spec.body_files.len().max(1));
        for path in &spec.body_files {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read body file: {}", path.display()))?;
            raw.push(Bytes::from(bytes));
        }
        if raw.is_empty() {
            raw.push(Bytes::from(spec.body.clone().unwrap_or_default()));
        }

        let bodies = raw
            .into_iter()
            .map(|bytes| {
                let size_sample = spec
                    .size_sample
                    .as_ref()
                    .and_then(|s| extract_sample(&bytes, &s.pointer));
                RequestBody { bytes, size_sample }
            })
            .collect::<Vec<_>>();

        if let Some(sample) = &spec.size_sample
            && bodies.iter().all(|b| b.size_sample.is_none())
        {
            tracing::warn!(
                target_name = name.as_deref().unwrap_or("-"),
                pointer = %sample.pointer,
                "no request body has a string at the size sample pointer"
            );
        }

        tracing::debug!(
            target_name = name.as_deref().unwrap_or("-"),
            url = %spec.url,
            bodies = bodies.len(),
            "target loaded"
        );

        Ok(Self {
            name,
            url: spec.url.clone(),
            request,
            bodies,
            next: AtomicUsize::new(0),
        })
    }

    /// Bodies are handed out round-robin across all virtual users.
    pub(crate) fn next_body(&self) -> &RequestBody {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.bodies.len();
        &self.bodies[i]
    }
}

/// The targets of a run in rotation order, plus the pause shared by all of them.
#[derive(Debug)]
pub(crate) struct TargetSet {
    templates: Vec<RequestTemplate>,
    think_time: Option<(Duration, Duration)>,
}

impl TargetSet {
    pub(crate) async fn load(
        specs: &[TargetSpec],
        think_time: Option<(Duration, Duration)>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!specs.is_empty(), "no targets to send requests to");
        let mut templates = Vec::with_capacity(specs.len());
        for spec in specs {
            templates.push(RequestTemplate::load(spec).await?);
        }
        Ok(Self {
            templates,
            think_time,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.templates.len()
    }

    /// Template at rotation position `i`, wrapping around.
    pub(crate) fn get(&self, i: usize) -> &RequestTemplate {
        &self.templates[i % self.templates.len()]
    }

    /// Stats index of rotation position `i`; unnamed targets are not tracked separately.
    pub(crate) fn stats_index(&self, i: usize) -> Option<usize> {
        let i = i % self.templates.len();
        self.templates[i].name.as_ref().map(|_| i)
    }

    /// Names of the tracked targets, in the order `stats_index` refers to them.
    pub(crate) fn names(&self) -> Vec<Arc<str>> {
        self.templates.iter().filter_map(|t| t.name.clone()).collect()
    }

    pub(crate) fn think(&self) -> Option<Duration> {
        let (min, max) = self.think_time?;
        if max.is_zero() {
            return None;
        }
        Some(rand::thread_rng().gen_range(min..=max))
    }
}

fn extract_sample(body: &[u8], pointer: &str) -> Option<Arc<str>> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.pointer(pointer)?.as_str().map(Arc::from)
}
