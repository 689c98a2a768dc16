use std::time::Duration;

use chrono::NaiveDate;
use mockito::Server;
use stream_proto::schedule::ScheduleClient;
use stream_proto::CatalogError;

fn client(server: &Server) -> ScheduleClient {
    ScheduleClient::new(format!("{}/programm/konsole/tag/", server.url()), Duration::from_secs(5))
        .unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 1, 4).unwrap()
}

#[tokio::test]
async fn fetch_single_program() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/programm/konsole/tag/20160104")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"list":[{"id":"42","time":"10:00","title":"News","short_title":"News",
                "info":"...","url_stream":"http://x/1.mp3","day_label":"Mon"}]}"#,
        )
        .create_async()
        .await;

    let programs = client(&server).fetch_schedule(date()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(programs.len(), 1);
    assert_eq!(programs[0].id, 42);
    assert_eq!(programs[0].url, "http://x/1.mp3");
    assert_eq!(programs[0].title, "News");
    assert_eq!(programs[0].time, "10:00");
}

#[tokio::test]
async fn fetch_empty_list() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/programm/konsole/tag/20160104")
        .with_status(200)
        .with_body(r#"{"list":[]}"#)
        .create_async()
        .await;

    let programs = client(&server).fetch_schedule(date()).await.unwrap();
    assert!(programs.is_empty());
}

#[tokio::test]
async fn malformed_body_is_parse_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/programm/konsole/tag/20160104")
        .with_status(200)
        .with_body(r#"{"list":[{"id":"1","title":"missing fields"}]}"#)
        .create_async()
        .await;

    let result = client(&server).fetch_schedule(date()).await;
    assert!(matches!(result, Err(CatalogError::Parse(_))));
}

#[tokio::test]
async fn server_error_is_status_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/programm/konsole/tag/20160104")
        .with_status(503)
        .create_async()
        .await;

    let result = client(&server).fetch_schedule(date()).await;
    assert!(matches!(result, Err(CatalogError::Status { status: 503, .. })));
}

#[tokio::test]
async fn unreachable_host_is_network_error() {
    // Port 9 (discard) on localhost is closed in test environments.
    let client = ScheduleClient::new("http://127.0.0.1:9/tag/", Duration::from_secs(2)).unwrap();
    let result = client.fetch_schedule(date()).await;
    assert!(matches!(result, Err(CatalogError::Network(_))));
}

#[tokio::test]
async fn fetch_today_requests_local_date() {
    let mut server = Server::new_async().await;
    let today = chrono::Local::now().date_naive();
    let mock = server
        .mock("GET", format!("/programm/konsole/tag/{}", today.format("%Y%m%d")).as_str())
        .with_status(200)
        .with_body(r#"{"list":[]}"#)
        .create_async()
        .await;

    let programs = client(&server).fetch_today().await.unwrap();

    mock.assert_async().await;
    assert!(programs.is_empty());
}
