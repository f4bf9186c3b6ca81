mod common;

use common::BplStub;
use rusty_archive_keeper::{
    archiver::{ArchiverError, Registry, RegistryClient},
    types::{PvConfig, SamplingMethod},
};
use std::time::Duration;

const TEST_PVS: [&str; 3] = [
    "ROOM:LI30:1:OUTSIDE_TEMP",
    "CPT:PSI5:5205:PRESS",
    "CFT:PSI8:8601:FLOW",
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn setup_client(stub: &BplStub, retries: usize) -> RegistryClient {
        RegistryClient::with_settings(&stub.base_url(), Duration::from_secs(5), retries).unwrap()
    }

    fn names() -> Vec<String> {
        TEST_PVS.iter().map(|s| s.to_string()).collect()
    }

    /// Tests the report listings, including string-typed epoch seconds
    #[tokio::test]
    async fn test_listings() {
        let stub = BplStub::start().await;
        stub.respond(
            "getCurrentlyDisconnectedPVs",
            200,
            r#"[{"pvName":"ROOM:LI30:1:OUTSIDE_TEMP","noConnectionAsOfEpochSecs":"1700000000","instance":"appliance0"},
                {"pvName":"CPT:PSI5:5205:PRESS","noConnectionAsOfEpochSecs":1700000100.5}]"#,
        )
        .respond("getPausedPVsReport", 200, r#"[{"pvName":"CFT:PSI8:8601:FLOW"}]"#)
        .respond(
            "getAllExpandedPVNames",
            200,
            r#"["ROOM:LI30:1:OUTSIDE_TEMP","ROOM:LI30:1:OUTSIDE_TEMP.VAL","ALIAS:TEMP"]"#,
        );
        let client = setup_client(&stub, 0);

        let disconnected = client.list_disconnected().await.unwrap();
        assert_eq!(disconnected.len(), 2);
        assert_eq!(disconnected[0].name, TEST_PVS[0]);
        assert_eq!(disconnected[0].last_seen_epoch_secs, 1_700_000_000.0);
        assert_eq!(disconnected[1].last_seen_epoch_secs, 1_700_000_100.5);

        let paused = client.list_paused().await.unwrap();
        assert_eq!(paused[0].name, TEST_PVS[2]);

        let known = client.list_all_known_names().await.unwrap();
        assert_eq!(known.len(), 3);
        assert!(known.contains("ALIAS:TEMP"));

        let methods: Vec<String> = stub.requests().into_iter().map(|r| r.method).collect();
        assert_eq!(methods, vec!["GET", "GET", "GET"]);
    }

    /// Tests that mutations post JSON arrays and accept either ack shape
    #[tokio::test]
    async fn test_mutations() {
        let stub = BplStub::start().await;
        stub.respond("unarchivedPVs", 200, r#"["CPT:PSI5:5205:PRESS"]"#)
            .respond("pauseArchivingPV", 200, r#"{"pvName":"ROOM:LI30:1:OUTSIDE_TEMP","status":"ok"}"#)
            .respond(
                "resumeArchivingPV",
                200,
                r#"[{"pvName":"ROOM:LI30:1:OUTSIDE_TEMP","status":"ok"},{"pvName":"CPT:PSI5:5205:PRESS","status":"ok"}]"#,
            )
            .respond(
                "archivePV",
                200,
                r#"[{"pv":"CPT:PSI5:5205:PRESS","status":"Archive request submitted"}]"#,
            );
        let client = setup_client(&stub, 0);

        let unarchived = client.unarchived(&names()).await.unwrap();
        assert_eq!(unarchived, vec!["CPT:PSI5:5205:PRESS".to_string()]);
        let sent: Vec<String> = serde_json::from_str(&stub.requests_to("unarchivedPVs")[0].body).unwrap();
        assert_eq!(sent, names());

        let ack = client.pause(&names()[..1]).await.unwrap();
        assert_eq!(ack.len(), 1);
        assert_eq!(ack.entries[0].status.as_deref(), Some("ok"));

        let ack = client.resume(&names()[..2]).await.unwrap();
        assert_eq!(ack.len(), 2);

        let submission = vec![PvConfig::new(TEST_PVS[1], 2.0, SamplingMethod::Scan)];
        let ack = client.submit(&submission).await.unwrap();
        assert_eq!(ack.entries[0].name.as_deref(), Some(TEST_PVS[1]));

        let body: serde_json::Value = serde_json::from_str(&stub.requests_to("archivePV")[0].body).unwrap();
        assert_eq!(
            body,
            serde_json::json!([{"pv": "CPT:PSI5:5205:PRESS", "samplingperiod": "2", "samplingmethod": "SCAN"}])
        );
        assert!(stub.requests().iter().all(|r| r.method == "POST"));
    }

    /// Tests that listings are retried on gateway errors
    #[tokio::test]
    async fn test_get_retries_transient_errors() {
        let stub = BplStub::start().await;
        stub.respond("getPausedPVsReport", 503, "")
            .respond("getPausedPVsReport", 200, "[]");
        let client = setup_client(&stub, 2);

        let paused = client.list_paused().await.unwrap();
        assert!(paused.is_empty());
        assert_eq!(stub.requests_to("getPausedPVsReport").len(), 2);
    }

    /// Tests that posts are sent exactly once even when they fail
    #[tokio::test]
    async fn test_post_is_not_retried() {
        let stub = BplStub::start().await;
        stub.respond("pauseArchivingPV", 503, "busy");
        let client = setup_client(&stub, 3);

        let err = client.pause(&names()).await.unwrap_err();
        match err {
            ArchiverError::Status { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body.as_deref(), Some("busy"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(stub.requests_to("pauseArchivingPV").len(), 1);
    }

    /// Tests error mapping for client errors, bad JSON and unresponsive servers
    #[tokio::test]
    async fn test_error_cases() {
        let stub = BplStub::start().await;
        stub.respond("getPausedPVsReport", 200, "<html>not json</html>")
            .stall("getCurrentlyDisconnectedPVs");
        let client = setup_client(&stub, 3);

        let err = client.list_all_known_names().await.unwrap_err();
        assert!(err.is_client_error(), "404 expected, got {err:?}");
        assert_eq!(stub.requests_to("getAllExpandedPVNames").len(), 1);

        let err = client.list_paused().await.unwrap_err();
        assert!(matches!(err, ArchiverError::Json { .. }));

        let impatient =
            RegistryClient::with_settings(&stub.base_url(), Duration::from_millis(200), 0).unwrap();
        let err = impatient.list_disconnected().await.unwrap_err();
        assert!(matches!(err, ArchiverError::Timeout { .. }));
    }

    /// Tests that the base URL has to point at the mgmt bpl
    #[test]
    fn test_invalid_base_url() {
        for url in ["http://archiver/mgmt", "archiver/mgmt/bpl", "file:///mgmt/bpl"] {
            assert!(
                matches!(RegistryClient::new(url), Err(ArchiverError::InvalidUrl(_))),
                "{url} should be rejected"
            );
        }
    }
}
