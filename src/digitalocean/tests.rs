//! Unit tests for DigitalOcean payload decoding and error mapping.

use std::net::{IpAddr, Ipv4Addr};

use reqwest::StatusCode;
use rstest::rstest;

use super::types::{
    ActionEnvelope, CreateDropletBody, CreateDropletResponse, DropletEnvelope, SizesPage,
};
use super::{DigitalOceanApi, DigitalOceanError, api_error, decode};
use crate::backend::{ActionStatus, CreatedDroplet, Droplet, DropletRequest, InstanceStage, Size};

const ACTIVE_DROPLET: &str = r#"{
  "droplet": {
    "id": 3164494,
    "name": "do-exit-fra1-1a2b3c4d",
    "status": "active",
    "region": {"slug": "fra1", "name": "Frankfurt 1"},
    "image": {"id": 129211873, "slug": "ubuntu-22-04-x64"},
    "size_slug": "s-1vcpu-1gb",
    "networks": {
      "v4": [
        {"ip_address": "10.110.0.2", "type": "private"},
        {"ip_address": "203.0.113.10", "type": "public"}
      ]
    }
  }
}"#;

#[test]
fn active_droplet_exposes_public_address() {
    let envelope: DropletEnvelope =
        decode("/droplets/3164494", ACTIVE_DROPLET.as_bytes()).expect("payload should decode");
    let droplet = Droplet::from(envelope.droplet);

    assert_eq!(droplet.id, 3_164_494);
    assert_eq!(droplet.region, "fra1");
    assert_eq!(droplet.image_id, Some(129_211_873));
    assert_eq!(
        droplet.public_ip,
        Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)))
    );
    assert_eq!(droplet.stage, InstanceStage::Active);
}

#[test]
fn new_droplet_without_networks_is_created_stage() {
    let payload = r#"{"droplet": {"id": 7, "name": "n", "status": "new",
        "region": {"slug": "fra1"}, "image": null, "size_slug": "s-1vcpu-1gb"}}"#;
    let envelope: DropletEnvelope = decode("/droplets/7", payload.as_bytes()).expect("decode");
    let droplet = Droplet::from(envelope.droplet);

    assert_eq!(droplet.public_ip, None);
    assert_eq!(droplet.image_id, None);
    assert_eq!(droplet.stage, InstanceStage::Created);
}

#[test]
fn create_response_collects_action_ids() {
    let payload = r#"{
      "droplet": {"id": 42, "name": "do-exit-fra1", "status": "new"},
      "links": {"actions": [
        {"id": 7, "rel": "create", "href": "https://api.digitalocean.com/v2/actions/7"},
        {"id": 9, "rel": "create", "href": "https://api.digitalocean.com/v2/actions/9"}
      ]}
    }"#;
    let response: CreateDropletResponse = decode("/droplets", payload.as_bytes()).expect("decode");

    assert_eq!(
        CreatedDroplet::from(response),
        CreatedDroplet {
            id: 42,
            action_ids: vec![7, 9],
        }
    );
}

#[rstest]
#[case("in-progress", ActionStatus::InProgress)]
#[case("completed", ActionStatus::Completed)]
#[case("errored", ActionStatus::Errored)]
fn action_status_maps_provider_values(#[case] status: &str, #[case] expected: ActionStatus) {
    let payload = format!(r#"{{"action": {{"id": 1, "status": "{status}", "type": "create"}}}}"#);
    let envelope: ActionEnvelope = decode("/actions/1", payload.as_bytes()).expect("decode");
    assert_eq!(ActionStatus::from(envelope.action), expected);
}

#[test]
fn sizes_page_keeps_price_and_regions() {
    let payload = r#"{"sizes": [{"slug": "s-1vcpu-1gb", "memory": 1024, "vcpus": 1,
        "price_monthly": 6.0, "regions": ["fra1", "ams3"], "available": true}]}"#;
    let page: SizesPage = decode("/sizes", payload.as_bytes()).expect("decode");
    let sizes: Vec<Size> = page.sizes.into_iter().map(Size::from).collect();

    let [size] = sizes.as_slice() else {
        panic!("expected one size, got {sizes:?}");
    };
    assert_eq!(size.slug, "s-1vcpu-1gb");
    assert_eq!(size.memory_mb, 1024);
    assert_eq!(size.regions, vec![String::from("fra1"), String::from("ams3")]);
}

#[test]
fn create_body_serialises_request_fields() {
    let request = DropletRequest {
        name: String::from("do-exit-fra1-1a2b3c4d"),
        region: String::from("fra1"),
        size: String::from("s-1vcpu-1gb"),
        image: 129_211_873,
        ssh_keys: vec![11, 12],
        tags: vec![String::from("exit-node")],
    };
    let body = serde_json::to_value(CreateDropletBody::from(&request)).expect("serialise");

    assert_eq!(
        body,
        serde_json::json!({
            "name": "do-exit-fra1-1a2b3c4d",
            "region": "fra1",
            "size": "s-1vcpu-1gb",
            "image": 129_211_873,
            "ssh_keys": [11, 12],
            "tags": ["exit-node"],
        })
    );
}

#[test]
fn api_error_reads_structured_body() {
    let err = api_error(
        "/droplets/1",
        StatusCode::NOT_FOUND,
        br#"{"id": "not_found", "message": "The resource you were accessing could not be found."}"#,
    );

    assert!(err.is_not_found());
    assert_eq!(
        err.to_string(),
        "/droplets/1 returned 404 (not_found): The resource you were accessing could not be found."
    );
}

#[test]
fn api_error_falls_back_to_raw_body() {
    let err = api_error("/droplets", StatusCode::BAD_GATEWAY, b"upstream unavailable");

    assert_eq!(
        err,
        DigitalOceanError::Api {
            path: String::from("/droplets"),
            status: 502,
            id: String::from("unknown"),
            message: String::from("upstream unavailable"),
        }
    );
    assert!(!err.is_not_found());
}

#[test]
fn blank_token_is_rejected() {
    let err = DigitalOceanApi::new("   ").expect_err("blank token should fail");
    assert!(matches!(err, DigitalOceanError::Config(_)));
}
