use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Weekday};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write as IoWrite};
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex, Once};
use std::thread;
use std::time::Duration;
use stockcast::commands::{
    benchmark, copy_datasets, fetch, predict, prepare, render, BENCHMARK_DATASET, TEST_DATASET,
    TRAIN_DATASET, VALID_DATASET,
};
use stockcast::config::Settings;
use stockcast::context::AppContext;
use stockcast::deepar::{decode_json_lines, DeepArInstance};
use stockcast::handler::ForecastRequest;
use stockcast::models::PriceField;
use stockcast::providers::alpha_vantage::AlphaVantageClient;
use stockcast::providers::{fetch_price_history, PriceProvider, ProviderKind};
use stockcast::storage::{channel_key, dataset_key, ObjectStore};

const PREDICTION_LENGTH: usize = 10;
const TRADING_DAYS: usize = 120;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = dotenvy::dotenv();
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("stockcast-{}-{}", name, fastrand::u64(..)))
}

fn settings(entries: &[(&str, &str)]) -> Result<Settings> {
    let map: HashMap<String, String> = entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    Settings::from_settings_map(&map)
}

fn first_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 4).expect("valid date")
}

fn trading_days(count: usize) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(count);
    let mut day = first_day();
    while days.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(day);
        }
        day += ChronoDuration::days(1);
    }
    days
}

fn yahoo_chart_json(ticker: &str) -> String {
    let base = if ticker == "IBM" { 120.0 } else { 130.0 };
    let days = trading_days(TRADING_DAYS);
    let timestamps: Vec<i64> = days
        .iter()
        .map(|day| {
            day.and_hms_opt(14, 30, 0)
                .expect("valid time")
                .and_utc()
                .timestamp()
        })
        .collect();
    let closes: Vec<f64> = (0..days.len())
        .map(|i| base + i as f64 * 0.25 + (i as f64 / 5.0).sin())
        .collect();
    json!({
        "chart": {
            "result": [{
                "timestamp": timestamps,
                "indicators": {
                    "quote": [{
                        "open": closes.iter().map(|c| c - 0.5).collect::<Vec<_>>(),
                        "high": closes.iter().map(|c| c + 1.0).collect::<Vec<_>>(),
                        "low": closes.iter().map(|c| c - 1.0).collect::<Vec<_>>(),
                        "close": closes.clone(),
                        "volume": vec![1_000_000u64; days.len()],
                    }],
                    "adjclose": [{ "adjclose": closes.iter().map(|c| c * 0.98).collect::<Vec<_>>() }]
                }
            }],
            "error": null
        }
    })
    .to_string()
}

fn quantile_response_json(length: usize) -> String {
    let curve = |offset: f64| -> Vec<f64> { (0..length).map(|i| 150.0 + offset + i as f64).collect() };
    json!({
        "predictions": [{
            "quantiles": { "0.1": curve(-5.0), "0.5": curve(0.0), "0.9": curve(5.0) },
            "samples": [curve(1.0), curve(-1.0)]
        }]
    })
    .to_string()
}

#[derive(Debug, Clone)]
struct StubRequest {
    method: String,
    path: String,
    query: String,
    body: Vec<u8>,
}

struct StubResponse {
    status: &'static str,
    body: Vec<u8>,
}

impl StubResponse {
    fn json(status: &'static str, body: String) -> Self {
        Self {
            status,
            body: body.into_bytes(),
        }
    }

    fn empty(status: &'static str) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }
}

type Route = dyn Fn(&StubRequest) -> StubResponse + Send + Sync;

/// Minimal HTTP/1.1 server answering every request through `route`.
struct StubServer {
    base_url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StubServer {
    fn start(route: Arc<Route>) -> Result<Self> {
        let mut listener: Option<TcpListener> = None;
        for _ in 0..64 {
            let port = fastrand::u16(40_000..60_000);
            if let Ok(bound) = TcpListener::bind(("127.0.0.1", port)) {
                listener = Some(bound);
                break;
            }
        }
        let listener = match listener {
            Some(listener) => listener,
            None => TcpListener::bind("127.0.0.1:0")?,
        };
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let base_url = format!("http://{}", addr);
        let (shutdown, shutdown_rx) = mpsc::channel();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    let _ = handle_stub_request(stream, route.as_ref(), &recorded);
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    thread::sleep(Duration::from_millis(10));
                }
            }
        });

        Ok(Self {
            base_url,
            requests,
            shutdown,
            handle: Some(handle),
        })
    }

    fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_stub_request(
    mut stream: std::net::TcpStream,
    route: &Route,
    recorded: &Mutex<Vec<StubRequest>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Ok(());
    }
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Ok(());
    }
    let method = parts[0].to_string();
    let (path, query) = match parts[1].split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (parts[1].to_string(), String::new()),
    };

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    let request = StubRequest {
        method,
        path,
        query,
        body,
    };
    let response = route(&request);
    if let Ok(mut guard) = recorded.lock() {
        guard.push(request);
    }

    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        response.body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(&response.body)
}

fn forecast_routes() -> Arc<Route> {
    Arc::new(|request: &StubRequest| {
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", path) if path.starts_with("/v8/finance/chart/") => {
                let ticker = path.trim_start_matches("/v8/finance/chart/");
                StubResponse::json("200 OK", yahoo_chart_json(ticker))
            }
            ("POST", "/invocations") => {
                StubResponse::json("200 OK", quantile_response_json(PREDICTION_LENGTH))
            }
            _ => StubResponse::empty("404 Not Found"),
        }
    })
}

async fn load_instance(store: &ObjectStore, dataset: &str, ticker: &str) -> Result<DeepArInstance> {
    store
        .load_dataset(dataset, ticker)
        .await
        .map_err(|err| anyhow!("{}", err))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_prepare_predict_render_round_trip() -> Result<()> {
    ensure_test_env();
    let stub = StubServer::start(forecast_routes())?;
    let root = temp_dir("pipeline");
    let store_dir = root.join("store");
    let endpoint_url = format!("{}/invocations", stub.base_url);
    let prediction_length = PREDICTION_LENGTH.to_string();
    let app = AppContext::initialize(settings(&[
        ("SUPPORTED_TICKERS", "IBM,AAPL"),
        ("DATA_STORE", store_dir.to_str().context("utf-8 path")?),
        ("FORECAST_ENDPOINT_URL", &endpoint_url),
        ("PRICE_PROVIDER_BASE_URL", &stub.base_url),
        ("PREDICTION_LENGTH", &prediction_length),
        ("PREDICTION_RETURN_SAMPLES", "true"),
        ("BENCHMARK_WINDOW", "5"),
    ])?)?;

    let snapshot = root.join("price-history.bin");
    let csv = root.join("price-history.csv");
    let history = fetch::run(
        &app,
        &fetch::FetchOptions {
            provider: ProviderKind::Yahoo,
            start: first_day(),
            end: first_day() + ChronoDuration::days(200),
            tickers: Vec::new(),
            output: snapshot.clone(),
            csv: Some(csv.clone()),
        },
    )
    .await?;
    assert_eq!(history.tickers(), ["AAPL".to_string(), "IBM".to_string()]);
    assert_eq!(history.bars("IBM").map(|b| b.len()), Some(TRADING_DAYS));
    assert!(csv.exists());
    assert!(snapshot.exists());

    let summary = prepare::run(
        &app,
        &prepare::PrepareOptions {
            data_file: csv.clone(),
            start: None,
            end: None,
            features: vec![PriceField::Volume],
            channel_path: prepare::DEFAULT_CHANNEL_PATH.to_string(),
            train_part: prepare::DEFAULT_TRAIN_PART,
            num_test_windows: prepare::DEFAULT_TEST_WINDOWS,
        },
    )
    .await?;
    assert_eq!(summary.tickers.len(), 2);
    assert!(summary.train_channel.ends_with("stock_deepar/D/train/"));

    let store = app.store();
    let train = load_instance(&store, TRAIN_DATASET, "IBM").await?;
    let test = load_instance(&store, TEST_DATASET, "IBM").await?;
    let valid = load_instance(&store, VALID_DATASET, "IBM").await?;
    assert_eq!(valid.target.len(), PREDICTION_LENGTH);
    assert_eq!(train.target.len() + PREDICTION_LENGTH, test.target.len());
    assert_eq!(train.start, "2021-01-04 00:00:00");
    // Weekend gaps are filled, so nothing is missing from the calendar series.
    assert!(test.target.iter().all(|value| value.is_finite()));
    // Features run one prediction length past each stored target.
    for instance in [&train, &test, &valid] {
        let features = instance.dynamic_feat.as_ref().context("dynamic_feat missing")?;
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].len(), instance.target.len() + PREDICTION_LENGTH);
    }

    let train_channel = store
        .get(&channel_key(prepare::DEFAULT_CHANNEL_PATH, "D", "train"))
        .await?
        .context("train channel missing")?;
    let test_channel = store
        .get(&channel_key(prepare::DEFAULT_CHANNEL_PATH, "D", "test"))
        .await?
        .context("test channel missing")?;
    assert_eq!(decode_json_lines(&train_channel)?.len(), 2);
    let tests = decode_json_lines(&test_channel)?;
    assert_eq!(tests.len(), 2 * prepare::DEFAULT_TEST_WINDOWS);
    assert!(tests[0].target.len() < tests[1].target.len());

    let written = benchmark::run(&app, None).await?;
    assert_eq!(written.len(), 2);
    let sma = load_instance(&store, BENCHMARK_DATASET, "IBM").await?;
    assert_eq!(sma.target.len(), PREDICTION_LENGTH);

    let response_file = root.join("ibm-response.json");
    let record = predict::run(
        &app,
        &predict::PredictOptions {
            ticker: Some("ibm".to_string()),
            start_date: None,
            output: Some(response_file.clone()),
        },
    )
    .await?;
    assert_eq!(record.ticker.as_deref(), Some("IBM"));
    assert_eq!(record.instance.target, train.target);
    assert_eq!(record.forecast().map(|f| f.len())?, PREDICTION_LENGTH);
    // The benchmark covers exactly the horizon a ticker forecast predicts.
    assert_eq!(sma.start, record.forecast_start);
    let raw: Value = serde_json::from_str(&std::fs::read_to_string(&response_file)?)?;
    assert!(raw["predictions"][0]["quantiles"]["0.5"].is_array());

    let invocation = stub
        .requests()
        .into_iter()
        .find(|request| request.path == "/invocations")
        .context("endpoint was not invoked")?;
    let payload: Value = serde_json::from_slice(&invocation.body)?;
    assert_eq!(payload["configuration"]["num_samples"], 100);
    assert_eq!(payload["configuration"]["quantiles"], json!(["0.1", "0.5", "0.9"]));
    assert_eq!(
        payload["configuration"]["output_types"],
        json!(["quantiles", "samples"])
    );
    assert_eq!(
        payload["instances"][0]["dynamic_feat"][0].as_array().map(Vec::len),
        Some(train.target.len() + PREDICTION_LENGTH)
    );
    assert_eq!(
        payload["instances"][0]["target"].as_array().map(Vec::len),
        Some(train.target.len())
    );

    let page_path = root.join("page").join("forecast.html");
    let page = render::run(
        &app,
        &render::RenderOptions {
            records: Vec::new(),
            history: 30,
            show_samples: true,
            title: render::DEFAULT_PAGE_TITLE.to_string(),
            width: 800.0,
            height: 400.0,
            output: page_path.clone(),
            publish_key: Some("pages/index.html".to_string()),
        },
    )
    .await?;
    assert!(page_path.exists());
    assert_eq!(page.matches("<svg").count(), 1, "only IBM has a forecast record");
    assert!(page.contains("<h2>IBM</h2>"));
    assert!(page.contains(">SMA<"));
    assert!(page.contains(r#"width="800" height="400""#));
    // Actual prices: 30 points of history plus the whole forecast horizon.
    let observed = page
        .lines()
        .find(|line| line.starts_with(r##"<polyline fill="none" stroke="#000000""##))
        .context("observed line missing")?;
    let points = observed
        .split("points=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .context("observed line has no points")?;
    assert_eq!(points.split_whitespace().count(), 30 + PREDICTION_LENGTH);
    assert!(store.exists("pages/index.html").await?);

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handler_modes_and_error_statuses() -> Result<()> {
    ensure_test_env();
    let stub = StubServer::start(forecast_routes())?;
    let root = temp_dir("handler");
    let endpoint_url = format!("{}/invocations", stub.base_url);
    let app = AppContext::initialize(settings(&[
        ("DATA_STORE", root.to_str().context("utf-8 path")?),
        ("FORECAST_ENDPOINT_URL", &endpoint_url),
        ("PREDICTION_NUM_SAMPLES", "50"),
    ])?)?;
    let store = app.store();
    let valid = DeepArInstance {
        start: "2021-05-01 00:00:00".to_string(),
        target: vec![101.0, f64::NAN, 103.0],
        cat: None,
        dynamic_feat: None,
    };
    store.put_json(&dataset_key(VALID_DATASET, "AMZN"), &valid).await?;

    let handler = app.handler()?;
    let ok = handler
        .handle(r#"{"ticker_name": "amzn", "start_date": "2021-06-01"}"#)
        .await;
    assert_eq!(ok.status_code, 200);
    assert_eq!(ok.headers["Access-Control-Allow-Origin"], "*");
    let body: Value = serde_json::from_str(&ok.body)?;
    assert!(body["predictions"].is_array());

    let sent: Value = serde_json::from_slice(
        &stub
            .requests()
            .last()
            .context("endpoint was not invoked")?
            .body,
    )?;
    assert_eq!(sent["instances"][0]["start"], "2021-06-01 00:00:00");
    assert_eq!(sent["instances"][0]["target"], json!([101.0, "NaN", 103.0]));
    assert_eq!(sent["configuration"]["num_samples"], 50);

    let outcome = handler
        .forecast(&ForecastRequest::new(None, Some("2021-07-01")))
        .await
        .map_err(|err| anyhow!("{}", err))?;
    assert!(outcome.instance.target.is_empty());
    assert_eq!(
        outcome.forecast_start,
        NaiveDate::from_ymd_opt(2021, 7, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .context("valid date")?
    );

    assert_eq!(handler.handle(r#"{"ticker_name": "IBM"}"#).await.status_code, 404);
    assert_eq!(handler.handle(r#"{"ticker_name": "TSLA"}"#).await.status_code, 400);

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn endpoint_failures_map_to_bad_gateway() -> Result<()> {
    ensure_test_env();
    let stub = StubServer::start(Arc::new(|_: &StubRequest| {
        StubResponse::json("500 Internal Server Error", r#"{"message":"model error"}"#.to_string())
    }))?;
    let endpoint_url = format!("{}/invocations", stub.base_url);
    let app = AppContext::initialize(settings(&[("FORECAST_ENDPOINT_URL", &endpoint_url)])?)?;

    let response = app.handler()?.handle(r#"{"start_date": "2021-07-01"}"#).await;
    assert_eq!(response.status_code, 502);
    let body: Value = serde_json::from_str(&response.body)?;
    assert!(body["error"]
        .as_str()
        .map(|message| message.contains("model error"))
        .unwrap_or(false));
    // One call plus two retries.
    assert_eq!(stub.requests().len(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_store_round_trip_and_copy() -> Result<()> {
    ensure_test_env();
    let objects: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::new(Mutex::new(HashMap::new()));
    let bucket = Arc::clone(&objects);
    let stub = StubServer::start(Arc::new(move |request: &StubRequest| {
        let Ok(mut objects) = bucket.lock() else {
            return StubResponse::empty("500 Internal Server Error");
        };
        match request.method.as_str() {
            "PUT" => {
                objects.insert(request.path.clone(), request.body.clone());
                StubResponse::empty("200 OK")
            }
            "GET" => match objects.get(&request.path) {
                Some(body) => StubResponse {
                    status: "200 OK",
                    body: body.clone(),
                },
                None => StubResponse::empty("404 Not Found"),
            },
            _ => StubResponse::empty("405 Method Not Allowed"),
        }
    }))?;

    let http = HttpClient::new();
    let remote = ObjectStore::from_location(&format!("{}/bucket/", stub.base_url), None, http);
    assert!(remote.get("valid/IBM.json").await?.is_none());

    let source_root = temp_dir("copy-source");
    let source = ObjectStore::local(&source_root);
    let instance = DeepArInstance {
        start: "2021-01-04 00:00:00".to_string(),
        target: vec![1.0, 2.0, 3.0],
        cat: None,
        dynamic_feat: None,
    };
    for ticker in ["IBM", "AAPL"] {
        for dataset in copy_datasets::default_datasets() {
            source
                .put_json(
                    &dataset_key(&format!("stock_deepar/json/{}", dataset), ticker),
                    &instance,
                )
                .await?;
        }
    }

    let app = AppContext::initialize(settings(&[
        ("SUPPORTED_TICKERS", "IBM AAPL"),
        ("DATA_STORE", &format!("{}/bucket", stub.base_url)),
    ])?)?;
    let copied = copy_datasets::run(
        &app,
        &copy_datasets::CopyOptions {
            source: source_root.to_str().context("utf-8 path")?.to_string(),
            source_prefix: copy_datasets::DEFAULT_SOURCE_PREFIX.to_string(),
            datasets: copy_datasets::default_datasets(),
        },
    )
    .await?;
    assert_eq!(copied, 6);
    assert!(objects
        .lock()
        .map(|o| o.contains_key("/bucket/benchmark/AAPL.json"))
        .unwrap_or(false));
    assert_eq!(load_instance(&remote, VALID_DATASET, "IBM").await?, instance);

    let _ = std::fs::remove_dir_all(source_root);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn alpha_vantage_history_is_filtered_and_sorted() -> Result<()> {
    ensure_test_env();
    let stub = StubServer::start(Arc::new(|request: &StubRequest| {
        if request.path != "/query" || !request.query.contains("apikey=demo") {
            return StubResponse::empty("403 Forbidden");
        }
        let symbol = request
            .query
            .split('&')
            .find_map(|pair| pair.strip_prefix("symbol="))
            .unwrap_or("UNKNOWN");
        let body = json!({
            "Meta Data": { "2. Symbol": symbol },
            "Time Series (Daily)": {
                "2021-01-07": { "1. open": "10", "2. high": "11", "3. low": "9", "4. close": "10.5",
                                "5. adjusted close": "10.4", "6. volume": "100" },
                "2021-01-05": { "1. open": "9", "2. high": "10", "3. low": "8", "4. close": "9.5",
                                "5. adjusted close": "9.4", "6. volume": "200" },
                "2020-12-30": { "1. open": "8", "2. high": "9", "3. low": "7", "4. close": "8.5",
                                "5. adjusted close": "8.4", "6. volume": "300" }
            }
        });
        StubResponse::json("200 OK", body.to_string())
    }))?;

    let http = HttpClient::new();
    let provider = PriceProvider::AlphaVantage(
        AlphaVantageClient::new(&http, Some("demo"))?.with_base_url(&stub.base_url),
    );
    let tickers = vec!["IBM".to_string(), "GOOGL".to_string()];
    let history = fetch_price_history(
        &provider,
        &tickers,
        NaiveDate::from_ymd_opt(2021, 1, 1).context("valid date")?,
        NaiveDate::from_ymd_opt(2021, 1, 31).context("valid date")?,
    )
    .await?;

    let bars = history.bars("GOOGL").context("GOOGL bars")?;
    assert_eq!(bars.len(), 2);
    assert!(bars[0].date < bars[1].date);
    assert_eq!(bars[1].adj_close, 10.4);
    assert_eq!(stub.requests().len(), 2);
    Ok(())
}
