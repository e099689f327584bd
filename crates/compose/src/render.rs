//! Render orchestrator: one request in, one response out.
//!
//! Generators run in a fixed order (application, role, log group, log stream). The first
//! failure turns the response into a single fatal result and leaves the desired state exactly
//! as the caller sent it.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use metrics::{counter, histogram};
use serde_json::{Map, Value as Json};
use tracing::{info, warn};
use xflink_core::protocol::{Resource, DEFAULT_TTL, ENVIRONMENT_CONTEXT_KEY};
use xflink_core::status::{Clock, CompositeStatusStore, SystemClock};
use xflink_core::{Paved, PavedMut, RunFunctionRequest, RunFunctionResponse};

use crate::activation::Decision;
use crate::config::RenderContext;
use crate::{activation, application, logs, role};
use crate::{APPLICATION_RESOURCE_NAME, LOG_GROUP_RESOURCE_NAME, LOG_STREAM_RESOURCE_NAME, ROLE_RESOURCE_NAME};

/// Field-ownership bookkeeping that must not be echoed back on the composite.
const MANAGED_FIELDS_PATH: &str = "metadata.managedFields";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub ttl: Duration,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl RenderOptions {
    /// Read `XFLINK_RESPONSE_TTL_SECS`; unset or unparsable values keep the default.
    pub fn from_env() -> Self {
        let ttl = std::env::var("XFLINK_RESPONSE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TTL);
        Self { ttl }
    }
}

/// Everything a successful render contributes to the response.
struct Rendered {
    name: String,
    composite: Json,
    resources: Vec<(&'static str, Json)>,
    warnings: Vec<String>,
}

pub struct Renderer<C: Clock = SystemClock> {
    clock: C,
    options: RenderOptions,
}

impl Renderer<SystemClock> {
    pub fn new(options: RenderOptions) -> Self {
        Self::with_clock(SystemClock, options)
    }
}

impl<C: Clock> Renderer<C> {
    pub fn with_clock(clock: C, options: RenderOptions) -> Self {
        Self { clock, options }
    }

    pub fn run_function(&self, req: &RunFunctionRequest) -> RunFunctionResponse {
        let started = Instant::now();
        counter!("render_attempts", 1u64);
        let mut rsp = RunFunctionResponse::to(req, self.options.ttl);

        match self.render(req) {
            Ok(rendered) => {
                for (name, manifest) in rendered.resources {
                    rsp.desired.resources.insert(name.to_string(), Resource::new(manifest));
                }
                rsp.desired.composite = Some(Resource::new(rendered.composite));
                for warning in rendered.warnings {
                    rsp.warning(warning);
                }
                rsp.normal(format!("Normal response for metadata.name={}", rendered.name));
                rsp.condition_true("FunctionSuccess", "Success").target_composite_and_claim();
                counter!("render_ok", 1u64);
                info!(name = %rendered.name, tag = %req.meta.tag, "rendered managed flink resources");
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(error = %message, tag = %req.meta.tag, "render failed");
                rsp.fatal(message);
                counter!("render_fatal", 1u64);
            }
        }
        histogram!("render_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
        rsp
    }

    fn render(&self, req: &RunFunctionRequest) -> anyhow::Result<Rendered> {
        let observed = observed_composite(req).context("cannot get observed composite resource")?;
        let empty = Map::new();
        let environment = environment(req, &empty).context("cannot get environment")?;
        let name = Paved::new(observed).string_or("metadata.name", "").context("cannot get observed composite resource")?;
        info!(name = %name, "rendering managed flink");

        let ctx = RenderContext::new(observed, environment).context("failed to render ManagedFlink resource")?;
        let (mut app, app_cfg) = application::generate(&ctx).context("failed to render ManagedFlink resource")?;
        let role = role::generate(&ctx).context("failed to render Role resource")?;
        let group = logs::generate_group(&ctx).context("failed to render LogGroup resource")?;
        let stream = logs::generate_stream(&ctx).context("failed to render LogStream resource")?;

        let mut composite = observed.clone();
        let observed_app = req
            .observed
            .resources
            .get(APPLICATION_RESOURCE_NAME)
            .map(|r| &r.resource)
            .filter(|r| !r.is_null());
        let decision = {
            let mut store = CompositeStatusStore::new(&mut composite);
            activation::decide(app_cfg.activation, observed_app, &mut store, &self.clock)
                .context("cannot update activation status")?
        };
        let mut warnings = Vec::new();
        match decision {
            Decision::Start => app.spec.for_provider.start_application = Some(true),
            Decision::Hold => {}
            Decision::StatusUnavailable => warnings.push(format!(
                "{} has no {}; delayed start is waiting",
                APPLICATION_RESOURCE_NAME,
                activation::OBSERVED_STATUS_PATH
            )),
        }
        PavedMut::new(&mut composite).delete(MANAGED_FIELDS_PATH)?;

        Ok(Rendered {
            name,
            composite,
            resources: vec![
                (APPLICATION_RESOURCE_NAME, app.to_json()?),
                (ROLE_RESOURCE_NAME, role.to_json()?),
                (LOG_GROUP_RESOURCE_NAME, group.to_json()?),
                (LOG_STREAM_RESOURCE_NAME, stream.to_json()?),
            ],
            warnings,
        })
    }
}

fn observed_composite(req: &RunFunctionRequest) -> anyhow::Result<&Json> {
    match req.observed.composite.as_ref().map(|c| &c.resource) {
        Some(v @ Json::Object(_)) => Ok(v),
        Some(Json::Null) | None => Err(anyhow!("no observed composite in request")),
        Some(other) => Err(anyhow!("expected object, found {}", xflink_core::fieldpath::shape_of(other))),
    }
}

/// The environment is optional; when present it must be a document.
fn environment<'a>(req: &'a RunFunctionRequest, empty: &'a Map<String, Json>) -> anyhow::Result<&'a Map<String, Json>> {
    match req.context_value(ENVIRONMENT_CONTEXT_KEY) {
        None | Some(Json::Null) => Ok(empty),
        Some(Json::Object(env)) => Ok(env),
        Some(other) => Err(anyhow!("expected object, found {}", xflink_core::fieldpath::shape_of(other))),
    }
}
