use std::path::Path;
use std::sync::Arc;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::json;
use tempfile::tempdir;

use news_geocoder::commands;
use news_geocoder::config::{AppConfig, WorkerConfig};
use news_geocoder::content::CONTENT_UNAVAILABLE;
use news_geocoder::db::{ArticleStore, NewArticle, ADDRESS_NOT_FOUND};
use news_geocoder::geocache::{Coordinates, GeocodeCache};
use news_geocoder::geocoder::{GeocodeOutcome, GeocodingClient, HttpGeocoder, RegionBounds};
use news_geocoder::resolver::ResolutionStrategy;
use news_geocoder::App;

const ARTICLE_PAGE: &str = r#"<html><head><script>track("<p>x</p>")</script></head><body>
<nav><p>Главная</p></nav>
<article>
  <p>Пожар произошёл на улице Гайдара, дом&nbsp;12.</p>
  <p>Жильцов эвакуировали.</p>
</article>
</body></html>"#;

fn yandex_response(pos: &str) -> serde_json::Value {
    json!({
        "response": {
            "GeoObjectCollection": {
                "metaDataProperty": {"GeocoderResponseMetaData": {"found": "1"}},
                "featureMember": [{
                    "GeoObject": {
                        "name": "улица Гайдара, 12",
                        "Point": {"pos": pos}
                    }
                }]
            }
        }
    })
}

fn test_config(dir: &Path, server: &Server) -> AppConfig {
    let gazetteer = dir.join("streets.json");
    std::fs::write(
        &gazetteer,
        json!({"streets": ["Гайдара", "ленина", "  "]}).to_string(),
    )
    .unwrap();

    let mut config = AppConfig::for_data_dir(dir);
    config.gazetteer_path = gazetteer;
    config.known_places_path = dir.join("missing_known_places.json");
    config.landmarks_path = dir.join("missing_landmarks.json");
    config.geocoder_endpoint = server.url_str("/1.x/");
    config.worker = WorkerConfig {
        batch_size: 6,
        idle_secs: 0,
        item_delay_ms: 0,
        batch_delay_secs: 0,
        backoff_secs: 0,
    };
    config
}

#[tokio::test]
async fn worker_resolves_and_geocodes_backlog_over_http() {
    let server = Server::run();
    let dir = tempdir().unwrap();

    server.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path("/news/1")
        ))
        .respond_with(
            status_code(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .body(ARTICLE_PAGE),
        ),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path("/1.x/"),
            request::query(url_decoded(contains(("geocode", "Архангельск, гайдара, 12")))),
            request::query(url_decoded(contains(("bbox", "35.5,62.8~49,67.5")))),
            request::query(url_decoded(contains(("results", "1"))))
        ))
        .times(1)
        .respond_with(json_encoded(yandex_response("40.5433 64.5401"))),
    );

    let app = App::initialize(test_config(dir.path(), &server)).unwrap();
    let first = app
        .store()
        .insert_article(&NewArticle {
            url: server.url_str("/news/1"),
            title: "Пожар в жилом доме".into(),
            ..NewArticle::default()
        })
        .unwrap();
    let second = app
        .store()
        .insert_article(&NewArticle {
            url: server.url_str("/news/2"),
            title: "Жильцы дома на улице Гайдара, 12 остались без света".into(),
            content: Some("<p>Свет дали к вечеру.</p>".into()),
            ..NewArticle::default()
        })
        .unwrap();

    let report = app.worker().run_cycle().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.geocoded, 2);
    assert_eq!(report.failed, 0);

    let expected = Coordinates::new(64.5401, 40.5433);
    for id in [first, second] {
        let stored = app.store().fetch_by_id(id).unwrap().unwrap();
        assert_eq!(stored.address.as_deref(), Some("Архангельск, гайдара, 12"));
        assert_eq!(stored.coords, Some(expected));
    }
    let fetched = app.store().fetch_by_id(first).unwrap().unwrap();
    assert!(fetched.content.unwrap().contains("Пожар произошёл на улице Гайдара"));

    let reopened = GeocodeCache::open(dir.path().join("geo_cache.json"));
    assert_eq!(reopened.get("Архангельск, гайдара, 12"), Some(expected));

    assert!(app.worker().run_cycle().await.unwrap().is_idle());
}

#[tokio::test]
async fn unreachable_page_without_address_is_marked_not_found() {
    let server = Server::run();
    let dir = tempdir().unwrap();

    server.expect(
        Expectation::matching(request::path("/news/404"))
            .times(2)
            .respond_with(status_code(500)),
    );

    let app = App::initialize(test_config(dir.path(), &server)).unwrap();
    let id = app
        .store()
        .insert_article(&NewArticle {
            url: server.url_str("/news/404"),
            title: "Погода на выходные".into(),
            ..NewArticle::default()
        })
        .unwrap();

    let report = app.worker().run_cycle().await.unwrap();
    assert_eq!(report.unresolved, 1);

    let stored = app.store().fetch_by_id(id).unwrap().unwrap();
    assert_eq!(stored.address.as_deref(), Some(ADDRESS_NOT_FOUND));
    assert_eq!(stored.coords, None);
    assert_eq!(stored.content.as_deref(), Some(CONTENT_UNAVAILABLE));
    assert!(app.worker().run_cycle().await.unwrap().is_idle());

    assert_eq!(commands::requeue(&app, None).unwrap(), 1);
    let again = app.worker().run_cycle().await.unwrap();
    assert_eq!(again.unresolved, 1);
}

#[tokio::test]
async fn http_geocoder_filters_empty_foreign_and_failed_answers() {
    let server = Server::run();
    let dir = tempdir().unwrap();
    let config = test_config(dir.path(), &server);

    server.expect(
        Expectation::matching(request::query(url_decoded(contains((
            "geocode",
            "Архангельск, тверская",
        )))))
        .respond_with(json_encoded(yandex_response("37.6173 55.7558"))),
    );
    server.expect(
        Expectation::matching(request::query(url_decoded(contains((
            "geocode",
            "Архангельск, нигде",
        )))))
        .respond_with(json_encoded(json!({
            "response": {"GeoObjectCollection": {"featureMember": []}}
        }))),
    );
    server.expect(
        Expectation::matching(request::query(url_decoded(contains((
            "geocode",
            "Архангельск, ленина",
        )))))
        .times(2)
        .respond_with(status_code(403)),
    );

    let cache = Arc::new(GeocodeCache::open(dir.path().join("cache.json")));
    let client = GeocodingClient::new(cache.clone(), Arc::new(HttpGeocoder::new(&config).unwrap()));
    let region = RegionBounds::parse(&config.region_bbox).unwrap();

    assert_eq!(
        client.resolve_detailed("Архангельск, тверская", &region).await,
        GeocodeOutcome::NotFound
    );
    assert_eq!(
        client.resolve_detailed("Архангельск, нигде", &region).await,
        GeocodeOutcome::NotFound
    );
    for _ in 0..2 {
        assert_eq!(
            client.resolve_detailed("Архангельск, ленина", &region).await,
            GeocodeOutcome::Failed
        );
    }
    assert!(cache.is_empty());
}

#[tokio::test]
async fn resolve_command_dry_runs_without_network() {
    let server = Server::run();
    let dir = tempdir().unwrap();
    let app = App::initialize(test_config(dir.path(), &server)).unwrap();

    let report = commands::resolve(
        &app,
        "ДТП на перекрёстке",
        "Авария случилась у дома 5 на улице Ленина.",
        false,
    )
    .await;
    let candidate = report.candidate.unwrap();
    assert_eq!(candidate.strategy, ResolutionStrategy::Gazetteer);
    assert_eq!(candidate.address, "Архангельск, ленина");
    assert_eq!(report.coords, None);
    assert_eq!(report.geocode_source, None);

    let health = app.health();
    assert_eq!(health.gazetteer_entries, 2);
    assert_eq!(health.geocode_cache_entries, 0);
    assert!(!health.config.has_geocoder_api_key);
}
