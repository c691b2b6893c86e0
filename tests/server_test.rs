//! Integration tests for the dashboard HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use vitals_sync::core::ReferenceRanges;
    use vitals_sync::server::{run, ServerConfig, SharedSnapshot};
    use vitals_sync::source::{MemorySource, MetricRecord, NewRecord, RecordId, UserId};
    use vitals_sync::{SessionOptions, SyncSession};

    fn record(id: &str, hours_ago: i64, heart_rate: i32) -> MetricRecord {
        MetricRecord {
            id: RecordId::from(id),
            user_id: UserId::from("u-1"),
            heart_rate,
            blood_oxygen: 97,
            temperature: 36.6,
            activity_level: 50,
            timestamp: Utc::now() - ChronoDuration::hours(hours_ago),
            anomaly: false,
        }
    }

    async fn start_server(snapshot: SharedSnapshot) -> (String, tokio::sync::oneshot::Sender<()>) {
        let config = ServerConfig::new(0, ReferenceRanges::default());
        let (addr, shutdown_tx) = run(config, snapshot)
            .await
            .expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;
        (format!("http://{addr}"), shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let snapshot = SharedSnapshot::new(UserId::from("u-1"));
        let (base, shutdown_tx) = start_server(snapshot).await;

        let response = reqwest::get(format!("{base}/health"))
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["user_id"], "u-1");
        assert_eq!(body["record_count"], 0);
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_latest_is_not_found_before_first_publish() {
        let snapshot = SharedSnapshot::new(UserId::from("u-1"));
        let (base, shutdown_tx) = start_server(snapshot.clone()).await;

        let response = reqwest::get(format!("{base}/latest")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "NO_DATA");

        snapshot.publish(&[record("r2", 1, 80), record("r1", 2, 70)]);
        let response = reqwest::get(format!("{base}/latest")).await.unwrap();
        assert!(response.status().is_success());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["id"], "r2");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_records_and_averages() {
        let snapshot = SharedSnapshot::new(UserId::from("u-1"));
        snapshot.publish(&[
            record("r3", 1, 72),
            record("r2", 2, 71),
            record("r1", 24 * 10, 100),
        ]);
        let (base, shutdown_tx) = start_server(snapshot).await;

        let rows: Vec<serde_json::Value> = reqwest::get(format!("{base}/records?limit=2"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], "r3");

        let body: serde_json::Value = reqwest::get(format!("{base}/averages?days=7"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["days"], 7);
        assert_eq!(body["averages"]["heart_rate"], 72);
        assert_eq!(body["averages"]["sample_count"], 2);

        let body: serde_json::Value = reqwest::get(format!("{base}/averages?days=0"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(body["averages"].is_null());

        let body: serde_json::Value = reqwest::get(format!("{base}/averages?days={}", u32::MAX))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["averages"]["sample_count"], 3);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_summary_follows_session() {
        let source = MemorySource::new();
        source.create(NewRecord {
            user_id: UserId::from("u-1"),
            heart_rate: 65,
            blood_oxygen: 99,
            temperature: 36.5,
            activity_level: 30,
            timestamp: Utc::now(),
            anomaly: false,
        });

        let snapshot = SharedSnapshot::new(UserId::from("u-1"));
        let mut session =
            SyncSession::new(source, UserId::from("u-1"), SessionOptions::default());
        session.on_change(snapshot.observer());
        session.start().unwrap();
        assert_eq!(snapshot.len(), 1);

        let (base, shutdown_tx) = start_server(snapshot).await;
        let body: serde_json::Value = reqwest::get(format!("{base}/summary"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["producer"], "vitals-sync");
        assert_eq!(body["record_count"], 1);
        assert_eq!(body["weekly"]["averages"]["heart_rate"], 65);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let snapshot = SharedSnapshot::new(UserId::from("u-1"));
        let (base, shutdown_tx) = start_server(snapshot).await;

        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("{base}/summary"))
            .header("Origin", "http://localhost:3000")
            .header("Access-Control-Request-Method", "GET")
            .send()
            .await
            .expect("Failed to send request");

        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        let _ = shutdown_tx.send(());
    }
}
