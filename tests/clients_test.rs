use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use windscout::{
    cache::MemoryCache,
    config::{HttpConfig, MailConfig, RateLimit},
    geo::{Coordinates, GeoapifyGeocoder, Geocoder, LocationResolver, PostalCodeTable},
    http::HttpClient,
    notify::{Mailer, MailjetMailer},
    ScoutError,
};

fn http() -> Arc<HttpClient> {
    let config = HttpConfig {
        max_retries: 1,
        rate_limit: RateLimit {
            requests_per_second: 0.0,
            burst_size: 4,
        },
        ..HttpConfig::default()
    };
    Arc::new(HttpClient::new(config).unwrap())
}

fn mail_config() -> MailConfig {
    MailConfig {
        api_key: Some("public".into()),
        secret_key: Some("private".into()),
        from_email: "scout@example.org".into(),
        from_name: "Windscout".into(),
        recipients: vec!["rider@example.org".into()],
    }
}

#[tokio::test]
async fn test_geoapify_lookup_is_cached() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/geocode/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("text".into(), "Karlsruhe Durlach".into()),
            Matcher::UrlEncoded("apiKey".into(), "geo-key".into()),
            Matcher::UrlEncoded("filter".into(), "countrycode:de".into()),
        ]))
        .with_status(200)
        .with_body(json!({"features": [{"properties": {"lat": 48.9995, "lon": 8.4738}}]}).to_string())
        .expect(1)
        .create_async()
        .await;

    let geocoder = GeoapifyGeocoder::new(http(), Arc::new(MemoryCache::new()), "geo-key", "de")
        .with_base_url(server.url());

    let first = geocoder.geocode("Karlsruhe Durlach").await.unwrap();
    let second = geocoder.geocode("Karlsruhe Durlach").await.unwrap();

    assert_eq!(first, Coordinates::new(48.9995, 8.4738));
    assert_eq!(second, first);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_geoapify_without_match_is_an_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/geocode/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"features": []}"#)
        .create_async()
        .await;

    let geocoder = GeoapifyGeocoder::new(http(), Arc::new(MemoryCache::new()), "geo-key", "de")
        .with_base_url(server.url());

    let result = geocoder.geocode("Atlantis").await;
    assert!(matches!(result, Err(ScoutError::GeocodingError(_))));
}

#[tokio::test]
async fn test_resolver_prefers_postal_table() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v1/geocode/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"features": [{"properties": {"lat": 1.0, "lon": 2.0}}]}).to_string())
        .expect(1)
        .create_async()
        .await;

    let geocoder: Arc<dyn Geocoder> = Arc::new(
        GeoapifyGeocoder::new(http(), Arc::new(MemoryCache::new()), "geo-key", "de").with_base_url(server.url()),
    );
    let table = PostalCodeTable::from_csv("plz,lat,lon\n76131,49.0094,8.4044\n").unwrap();
    let resolver = LocationResolver::new(table, Some(geocoder));

    assert_eq!(resolver.resolve("76131 Karlsruhe").await, Coordinates::new(49.0094, 8.4044));
    assert_eq!(resolver.resolve("Irgendwo am See").await, Coordinates::new(1.0, 2.0));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_mailjet_send() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v3.1/send")
        .match_header("authorization", Matcher::Regex("^Basic ".into()))
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""Subject":"2 new interesting windsurf offers""#.into()),
            Matcher::Regex(r#""To":\[\{"Email":"rider@example.org"\}\]"#.into()),
            Matcher::Regex(r#""TextPart":"== Sail \(2\) ==""#.into()),
        ]))
        .with_status(200)
        .with_body(r#"{"Messages": [{"Status": "success"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let mailer = MailjetMailer::from_config(http(), &mail_config())
        .unwrap()
        .with_base_url(server.url());

    mailer
        .send("2 new interesting windsurf offers", "== Sail (2) ==")
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_mailjet_rejected_message() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v3.1/send")
        .with_status(200)
        .with_body(r#"{"Messages": [{"Status": "error"}]}"#)
        .create_async()
        .await;

    let mailer = MailjetMailer::from_config(http(), &mail_config())
        .unwrap()
        .with_base_url(server.url());

    let result = mailer.send("subject", "body").await;
    assert!(matches!(result, Err(ScoutError::MailError(_))));
}

#[tokio::test]
async fn test_mailjet_bad_credentials() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v3.1/send")
        .with_status(401)
        .create_async()
        .await;

    let mailer = MailjetMailer::from_config(http(), &mail_config())
        .unwrap()
        .with_base_url(server.url());

    let result = mailer.send("subject", "body").await;
    assert!(matches!(result, Err(ScoutError::HttpStatus { status: 401, .. })));
}
