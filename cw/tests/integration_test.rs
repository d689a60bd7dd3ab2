//! End-to-end runs against a scripted site

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use coursewatch::config::SiteConfig;
use coursewatch::discovery::Discovery;
use coursewatch::transport::{HttpBackend, HttpRequest, HttpResponse, NetworkError, RetryPolicy, Transport};
use coursewatch::watch::{BatchConfig, ProgressTemplate, WatchConfig, WatchEngine, WatchOutcome, watch_course_incomplete};
use coursewatch::RpcGateway;

const TEMPLATE: &str = r#"[{"index":0,"methodname":"mod_fsresource_set_time","args":{
    "fsresourceid":{fsresourceid},"courseid":{courseId},"time":{time},"sesskey":"{sesskey}",
    "progress":"0","finish":0,"unique":""}}]"#;

/// Fake site: pages by path, and a service that completes after a set number of calls per resource
struct FakeSite {
    pages: HashMap<String, String>,
    complete_after: u32,
    submissions: Mutex<Vec<Value>>,
    transient_failures: Mutex<u32>,
}

impl FakeSite {
    fn new(complete_after: u32) -> Self {
        Self {
            pages: HashMap::new(),
            complete_after,
            submissions: Mutex::new(Vec::new()),
            transient_failures: Mutex::new(0),
        }
    }

    fn page(mut self, path: &str, html: &str) -> Self {
        self.pages.insert(path.to_string(), html.to_string());
        self
    }

    fn failing_first(self, count: u32) -> Self {
        *self.transient_failures.lock().unwrap() = count;
        self
    }

    fn submissions(&self) -> Vec<Value> {
        self.submissions.lock().unwrap().clone()
    }

    fn service(&self, request: &HttpRequest) -> HttpResponse {
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return HttpResponse::new(502, "bad gateway");
            }
        }

        let body: Value = serde_json::from_str(request.body.as_deref().unwrap_or("[]")).unwrap();
        let args = body[0]["args"].clone();
        let resource = args["fsresourceid"].clone();

        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(args);
        let seen = submissions.iter().filter(|a| a["fsresourceid"] == resource).count() as u32;
        let completion = if seen >= self.complete_after { "已完成" } else { "未完成" };
        HttpResponse::new(
            200,
            json!([{"error": false, "data": {"status": "ok", "completion": completion}}]).to_string(),
        )
    }
}

#[async_trait]
impl HttpBackend for FakeSite {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        let path = request.url.trim_start_matches("https://lms.test");
        if path.starts_with("/lib/ajax/service.php") {
            return Ok(self.service(request));
        }
        Ok(match self.pages.get(path) {
            Some(html) => HttpResponse::new(200, html.clone()),
            None => HttpResponse::new(404, "not found"),
        })
    }
}

fn video_page(resource_id: u64) -> String {
    format!(
        r#"<html><head><script>M.cfg = {{"sesskey":"s3ss","courseId":2545,"sessiontimeout":"1440"}};</script></head>
<body><h2>Video {resource_id}</h2><script>var playerdata = {{fsresourceid: {resource_id}, duration: 180,}};</script></body></html>"#
    )
}

fn gateway(site: Arc<FakeSite>) -> RpcGateway {
    let transport = Transport::new(
        site,
        "https://lms.test",
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(800),
        },
    );
    RpcGateway::new(transport, &SiteConfig::default())
}

fn watch_config() -> WatchConfig {
    WatchConfig {
        duration: Duration::from_secs(600),
        interval: Duration::from_secs(60),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_watch_video_until_completed() {
    let site = Arc::new(FakeSite::new(4).page("/mod/fsresource/view.php?id=900", &video_page(4821)));
    let engine = WatchEngine::new(gateway(site.clone()), watch_config());

    let report = engine.run(900, Some(&ProgressTemplate::new(TEMPLATE))).await;

    assert!(matches!(report.outcome, WatchOutcome::Completed));
    assert_eq!(report.calls, 4);
    assert_eq!(report.title.as_deref(), Some("Video 4821"));

    let submissions = site.submissions();
    assert_eq!(submissions.len(), 4);
    let times: Vec<u64> = submissions.iter().map(|a| a["time"].as_u64().unwrap()).collect();
    assert_eq!(times, vec![0, 60, 120, 180]);
    let progress: Vec<&str> = submissions.iter().map(|a| a["progress"].as_str().unwrap()).collect();
    assert_eq!(progress, vec!["0.00", "0.33", "0.67", "1.00"]);
    assert_eq!(submissions[3]["finish"], 1);
    assert_eq!(submissions[0]["courseid"], 2545);
    assert_eq!(submissions[0]["sesskey"], "s3ss");
}

#[tokio::test(start_paused = true)]
async fn test_transient_service_errors_are_retried() {
    let site = Arc::new(
        FakeSite::new(1)
            .page("/mod/fsresource/view.php?id=900", &video_page(4821))
            .failing_first(2),
    );
    let engine = WatchEngine::new(gateway(site.clone()), watch_config());

    let report = engine.run(900, Some(&ProgressTemplate::new(TEMPLATE))).await;
    assert!(matches!(report.outcome, WatchOutcome::Completed));
    assert_eq!(report.calls, 1);
    assert_eq!(report.failed_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_course_batch_watches_only_incomplete() {
    let course = r#"<ul class="topics">
<li class="activity fsresource modtype_fsresource"><a href="https://lms.test/mod/fsresource/view.php?id=11">Intro</a>
  <div class="activity-completion" data-completionstate="0"></div></li>
<li class="activity fsresource modtype_fsresource"><a href="https://lms.test/mod/fsresource/view.php?id=12">Done</a>
  <div class="activity-completion" data-completionstate="1"></div></li>
<li class="activity fsresource modtype_fsresource"><a href="https://lms.test/mod/fsresource/view.php?id=13">Next</a>
  <button class="btn btn-outline-secondary">待办事项</button></li>
</ul>"#;
    let site = Arc::new(
        FakeSite::new(2)
            .page("/course/view.php?id=2545", course)
            .page("/mod/fsresource/view.php?id=11", &video_page(101))
            .page("/mod/fsresource/view.php?id=13", &video_page(103)),
    );
    let gateway = gateway(site.clone());

    let videos = Discovery::new(gateway.clone()).list_videos(2545, true).await.unwrap();
    let ids: Vec<u64> = videos.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![11, 13]);

    let engine = WatchEngine::new(gateway, watch_config());
    let config = BatchConfig {
        limit: None,
        gap: Duration::from_secs(5),
    };
    let report = watch_course_incomplete(&engine, 2545, Some(&ProgressTemplate::new(TEMPLATE)), &config)
        .await
        .unwrap();

    assert_eq!(report.reports.len(), 2);
    assert_eq!(report.completed(), 2);
    let resources: Vec<u64> = site
        .submissions()
        .iter()
        .map(|a| a["fsresourceid"].as_u64().unwrap())
        .collect();
    assert_eq!(resources, vec![101, 101, 103, 103]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_course_is_nothing_to_do() {
    let site = Arc::new(FakeSite::new(1).page("/course/view.php?id=1", "<html><body>No activities</body></html>"));
    let engine = WatchEngine::new(gateway(site.clone()), watch_config());

    let report = watch_course_incomplete(&engine, 1, Some(&ProgressTemplate::new(TEMPLATE)), &BatchConfig::default())
        .await
        .unwrap();
    assert!(report.nothing_to_do());
    assert!(site.submissions().is_empty());
}
