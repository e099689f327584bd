#![forbid(unsafe_code)]

use serde_json::{json, Value as Json};
use xflink_compose::{RenderOptions, Renderer};
use xflink_core::protocol::{ConditionStatus, Resource, Severity, Target};
use xflink_core::status::FixedClock;
use xflink_core::{RunFunctionRequest, RunFunctionResponse};

const NOW: i64 = 1_700_000_500_000;

fn resource_config() -> Json {
    json!({
        "region": "us-east-2",
        "codeBucket": "b",
        "codeFile": "f.jar",
        "environmentProperties": [{
            "propertyGroup": [{ "propertyGroupId": "FlinkApplicationProperties", "propertyMap": { "INGRESS_STREAM": "in" } }]
        }]
    })
}

fn composite(config: Json, status: Option<Json>) -> Json {
    let mut xr = json!({
        "apiVersion": "example.org/v1alpha1",
        "kind": "XManagedFlink",
        "metadata": { "name": "flink-demo-7bq2x", "managedFields": [{ "manager": "crossplane", "operation": "Apply" }] },
        "spec": { "claimRef": { "name": "flink-demo", "namespace": "team-a" }, "resourceConfig": config }
    });
    if let Some(status) = status {
        xr["status"] = status;
    }
    xr
}

fn request(xr: Json, observed_app_status: Option<&str>) -> RunFunctionRequest {
    let mut req: RunFunctionRequest = serde_json::from_value(json!({
        "meta": { "tag": "req-1" },
        "observed": { "composite": { "resource": xr } },
        "context": { "apiextensions.crossplane.io/environment": { "awsAccountID": "123456789012" } }
    }))
    .unwrap();
    if let Some(status) = observed_app_status {
        req.observed.resources.insert(
            "flink-application".into(),
            Resource::new(json!({ "kind": "Application", "status": { "atProvider": { "status": status } } })),
        );
    }
    req
}

fn render_at(now: i64, req: &RunFunctionRequest) -> RunFunctionResponse {
    Renderer::with_clock(FixedClock(now), RenderOptions::default()).run_function(req)
}

fn desired<'a>(rsp: &'a RunFunctionResponse, name: &str) -> &'a Json {
    &rsp.desired.resources[name].resource
}

fn desired_status(rsp: &RunFunctionResponse) -> &Json {
    &rsp.desired.composite.as_ref().unwrap().resource["status"]["wa1419"]
}

fn delayed(delay: i64) -> Json {
    let mut cfg = resource_config();
    cfg["delayedStart"] = json!(true);
    cfg["delayStartBySeconds"] = json!(delay);
    cfg
}

#[test]
fn defaults_without_observed_resources() {
    let rsp = render_at(NOW, &request(composite(resource_config(), None), None));
    assert!(!rsp.is_fatal(), "{:?}", rsp.results);
    let app = desired(&rsp, "flink-application");
    assert_eq!(app["apiVersion"], "kinesisanalyticsv2.aws.upbound.io/v1beta1");
    assert_eq!(app["spec"]["forProvider"]["region"], "us-east-2");
    assert_eq!(app["spec"]["forProvider"]["runtimeEnvironment"], "FLINK-1_18");
    assert!(app["spec"]["forProvider"].get("startApplication").is_none());
    assert_eq!(app["spec"]["deletionPolicy"], "Delete");
    assert_eq!(app["spec"]["providerConfigRef"], json!({ "name": "provider-aws" }));

    assert_eq!(rsp.results.len(), 1);
    assert_eq!(rsp.results[0].severity, Severity::Normal);
    assert_eq!(rsp.results[0].message, "Normal response for metadata.name=flink-demo-7bq2x");
    assert_eq!(rsp.conditions.len(), 1);
    assert_eq!(rsp.conditions[0].status, ConditionStatus::True);
    assert_eq!(rsp.conditions[0].reason, "Success");
    assert_eq!(rsp.conditions[0].target, Some(Target::CompositeAndClaim));
}

#[test]
fn every_resource_has_the_managed_shape() {
    let rsp = render_at(NOW, &request(composite(resource_config(), None), None));
    for (name, kind) in [
        ("flink-application", "Application"),
        ("flink-role", "Role"),
        ("flink-log-group", "Group"),
        ("flink-log-stream", "Stream"),
    ] {
        let m = desired(&rsp, name);
        assert_eq!(m["kind"], kind, "{}", name);
        let spec = m["spec"].as_object().unwrap();
        let keys: Vec<_> = spec.keys().map(String::as_str).collect();
        assert_eq!(keys, ["deletionPolicy", "forProvider", "providerConfigRef"], "{}", name);
        assert!(m["metadata"]["name"].is_string(), "{}", name);
    }
    assert_eq!(desired(&rsp, "flink-role")["metadata"]["name"], "flink-demo-role");
    assert_eq!(desired(&rsp, "flink-log-group")["metadata"]["name"], "flink-demo-log-group");
    assert_eq!(desired(&rsp, "flink-log-stream")["metadata"]["name"], "flink-demo-log-stream");
}

#[test]
fn immediate_mode_sets_the_flag_when_requested() {
    let mut cfg = resource_config();
    cfg["startApplication"] = json!(true);
    let rsp = render_at(NOW, &request(composite(cfg, None), None));
    assert_eq!(desired(&rsp, "flink-application")["spec"]["forProvider"]["startApplication"], true);
    assert!(desired_status(&rsp).is_null());
}

#[test]
fn ready_application_starts_the_delay_clock() {
    let xr = composite(delayed(120), Some(json!({ "wa1419": { "readyAt": 0 } })));
    let rsp = render_at(NOW, &request(xr, Some("READY")));
    assert!(!rsp.is_fatal(), "{:?}", rsp.results);
    assert_eq!(desired_status(&rsp)["readyAt"], NOW);
    assert_eq!(desired_status(&rsp)["startApplication"], false);
    assert_eq!(desired_status(&rsp)["reqCounter"], 1);
    assert!(desired(&rsp, "flink-application")["spec"]["forProvider"].get("startApplication").is_none());
}

#[test]
fn elapsed_delay_activates_the_application() {
    let ready_at = NOW - 130_000;
    let xr = composite(delayed(120), Some(json!({ "wa1419": { "readyAt": ready_at, "reqCounter": 4 } })));
    let rsp = render_at(NOW, &request(xr, Some("READY")));
    assert_eq!(desired(&rsp, "flink-application")["spec"]["forProvider"]["startApplication"], true);
    assert_eq!(desired_status(&rsp)["readyAt"], ready_at);
    assert_eq!(desired_status(&rsp)["startApplication"], true);
    assert_eq!(desired_status(&rsp)["reqCounter"], 5);
}

#[test]
fn pending_delay_keeps_the_flag_unset() {
    let ready_at = NOW - 60_000;
    let xr = composite(delayed(120), Some(json!({ "wa1419": { "readyAt": ready_at } })));
    let rsp = render_at(NOW, &request(xr, Some("RUNNING")));
    assert!(desired(&rsp, "flink-application")["spec"]["forProvider"].get("startApplication").is_none());
    assert_eq!(desired_status(&rsp)["readyAt"], ready_at);
}

#[test]
fn ready_at_is_never_reset_by_a_regressed_status() {
    let ready_at = NOW - 10_000;
    for status in ["STARTING", "UPDATING", "READY", "RUNNING"] {
        let xr = composite(delayed(120), Some(json!({ "wa1419": { "readyAt": ready_at } })));
        let rsp = render_at(NOW, &request(xr, Some(status)));
        assert_eq!(desired_status(&rsp)["readyAt"], ready_at, "{}", status);
    }
}

#[test]
fn delayed_mode_without_observed_application_is_a_noop() {
    let xr = composite(delayed(120), None);
    let rsp = render_at(NOW, &request(xr, None));
    assert!(!rsp.is_fatal());
    assert!(desired_status(&rsp).is_null());
}

#[test]
fn observed_application_without_status_leaves_status_untouched() {
    let ready_at = NOW - 130_000;
    let xr = composite(delayed(120), Some(json!({ "wa1419": { "readyAt": ready_at, "reqCounter": 2 } })));
    let mut req = request(xr, None);
    req.observed.resources.insert("flink-application".into(), Resource::new(json!({ "kind": "Application" })));
    let rsp = render_at(NOW, &req);
    assert!(!rsp.is_fatal(), "{:?}", rsp.results);
    assert!(desired(&rsp, "flink-application")["spec"]["forProvider"].get("startApplication").is_none());
    assert_eq!(desired_status(&rsp), &json!({ "readyAt": ready_at, "reqCounter": 2 }));
    assert_eq!(rsp.results[0].severity, Severity::Warning);
}

#[test]
fn negative_ready_at_is_fatal_rather_than_activating() {
    let xr = composite(delayed(120), Some(json!({ "wa1419": { "readyAt": -1 } })));
    let rsp = render_at(NOW, &request(xr, Some("STARTING")));
    assert_eq!(rsp.results.len(), 1);
    assert_eq!(rsp.results[0].severity, Severity::Fatal);
    assert_eq!(
        rsp.results[0].message,
        "cannot update activation status: readyAt: expected non-negative integer, found negative integer"
    );
    assert!(rsp.desired.resources.is_empty());
}

#[test]
fn request_counter_at_its_limit_does_not_overflow() {
    let xr = composite(delayed(120), Some(json!({ "wa1419": { "reqCounter": i64::MAX } })));
    let rsp = render_at(NOW, &request(xr, Some("READY")));
    assert!(!rsp.is_fatal(), "{:?}", rsp.results);
    assert_eq!(desired_status(&rsp)["reqCounter"], i64::MAX);
    assert_eq!(desired_status(&rsp)["readyAt"], NOW);
}

#[test]
fn corrupt_ready_at_is_fatal() {
    let xr = composite(delayed(120), Some(json!({ "wa1419": { "readyAt": "yesterday" } })));
    let rsp = render_at(NOW, &request(xr, Some("READY")));
    assert_eq!(rsp.results.len(), 1);
    assert_eq!(rsp.results[0].severity, Severity::Fatal);
    assert!(rsp.results[0].message.contains("readyAt"), "{}", rsp.results[0].message);
}

#[test]
fn string_inline_policy_is_fatal_and_emits_nothing() {
    let mut cfg = resource_config();
    cfg["additionalPermissions"] = json!({ "inlinePolicies": ["not-a-map"] });
    let mut req = request(composite(cfg, None), None);
    req.desired.resources.insert("unrelated".into(), Resource::new(json!({ "kind": "Bucket" })));
    let rsp = render_at(NOW, &req);
    assert_eq!(rsp.results.len(), 1);
    assert_eq!(rsp.results[0].severity, Severity::Fatal);
    assert_eq!(
        rsp.results[0].message,
        "failed to render Role resource: spec.resourceConfig.additionalPermissions.inlinePolicies[0]: entry is not a map (found string)"
    );
    assert_eq!(rsp.desired, req.desired);
    assert!(rsp.conditions.is_empty());
}

#[test]
fn managed_policies_are_builtins_then_additions() {
    for additional in [json!([]), json!(["arn:aws:iam::aws:policy/A"]), json!(["arn:a", "arn:b", "arn:c"])] {
        let n = additional.as_array().unwrap().len();
        let mut cfg = resource_config();
        cfg["additionalPermissions"] = json!({ "managedPolicyArns": additional });
        let rsp = render_at(NOW, &request(composite(cfg, None), None));
        let arns = desired(&rsp, "flink-role")["spec"]["forProvider"]["managedPolicyArns"].as_array().unwrap().clone();
        assert_eq!(arns.len(), 2 + n);
        assert_eq!(arns[0], "arn:aws:iam::aws:policy/AmazonS3FullAccess");
        assert_eq!(arns[1], "arn:aws:iam::aws:policy/CloudWatchFullAccess");
        assert_eq!(&arns[2..], additional.as_array().unwrap().as_slice());
    }
}

#[test]
fn region_reaches_every_property_map() {
    let mut cfg = resource_config();
    cfg["region"] = json!("eu-west-1");
    let rsp = render_at(NOW, &request(composite(cfg, None), None));
    let props = &desired(&rsp, "flink-application")["spec"]["forProvider"]["applicationConfiguration"][0]["environmentProperties"];
    assert_eq!(props[0]["propertyGroup"][0]["propertyMap"]["AWS_REGION"], "eu-west-1");
    assert_eq!(props[0]["propertyGroup"][0]["propertyMap"]["INGRESS_STREAM"], "in");
}

#[test]
fn rendering_twice_is_byte_identical() {
    let xr = composite(delayed(120), Some(json!({ "wa1419": { "readyAt": NOW - 1_000 } })));
    let req = request(xr, Some("READY"));
    let a = serde_json::to_string(&render_at(NOW, &req)).unwrap();
    let b = serde_json::to_string(&render_at(NOW, &req)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn unrelated_desired_resources_pass_through() {
    let mut req = request(composite(resource_config(), None), None);
    req.desired.resources.insert("bucket".into(), Resource::new(json!({ "kind": "Bucket" })));
    req.desired.resources.insert("flink-role".into(), Resource::new(json!({ "kind": "Stale" })));
    let rsp = render_at(NOW, &req);
    assert_eq!(desired(&rsp, "bucket")["kind"], "Bucket");
    assert_eq!(desired(&rsp, "flink-role")["kind"], "Role");
    assert_eq!(rsp.desired.resources.len(), 5);
}

#[test]
fn composite_is_echoed_without_managed_fields() {
    let rsp = render_at(NOW, &request(composite(resource_config(), None), None));
    let xr = &rsp.desired.composite.as_ref().unwrap().resource;
    assert!(xr["metadata"].get("managedFields").is_none());
    assert_eq!(xr["metadata"]["name"], "flink-demo-7bq2x");
    assert_eq!(xr["spec"]["resourceConfig"]["codeBucket"], "b");
    assert_eq!(rsp.meta.tag, "req-1");
}

#[test]
fn missing_account_id_is_a_role_failure() {
    let mut req = request(composite(resource_config(), None), None);
    req.context = None;
    let rsp = render_at(NOW, &req);
    assert_eq!(rsp.results[0].message, "failed to render Role resource: cannot get awsAccountID from environment");
}
