//! Full runs against mocked JSON-RPC servers

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rpc_conform_core::{
    select, Endpoints, HttpDispatcher, Reporter, RunConfig, RunOutcome, RunReport, RunSummary,
    Runner, SelectionFilter,
};

fn write_fixture(root: &Path, api: &str, file: &str, content: &Value) {
    let dir = root.join("json").join(api);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), serde_json::to_string_pretty(content).unwrap()).unwrap();
}

fn fixture(rpc_method: &str, params: Value, response: Value) -> Value {
    json!([{
        "request": {"jsonrpc": "2.0", "method": rpc_method, "params": params, "id": 1},
        "response": response
    }])
}

fn rpc_result(result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": 1, "result": result})
}

async fn answer(server: &MockServer, rpc_method: &str, body: Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": rpc_method})))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn endpoints(candidate: &MockServer, reference: &MockServer, control: &MockServer) -> Endpoints {
    Endpoints {
        host: "127.0.0.1".to_string(),
        candidate_port: candidate.address().port(),
        reference_port: reference.address().port(),
        control_port: control.address().port(),
    }
}

struct Harness {
    dir: TempDir,
    candidate: MockServer,
    reference: MockServer,
    control: MockServer,
}

impl Harness {
    async fn start() -> Self {
        Self {
            dir: tempdir().unwrap(),
            candidate: MockServer::start().await,
            reference: MockServer::start().await,
            control: MockServer::start().await,
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn output(&self) -> std::path::PathBuf {
        self.root().join("results")
    }

    fn config(&self) -> RunConfig {
        RunConfig::new(self.output())
            .with_endpoints(endpoints(&self.candidate, &self.reference, &self.control))
            .with_timeout(Duration::from_secs(5))
    }

    async fn run(&self, config: RunConfig, filter: SelectionFilter) -> (RunReport, String) {
        let selection = select(&self.root().join("json"), &filter).unwrap();
        let dispatcher = HttpDispatcher::new(config.timeout).unwrap();
        let runner = Runner::new(config, dispatcher);
        let mut reporter = Reporter::new(Vec::new(), false);
        let report = runner.run(&selection, &mut reporter).await.unwrap();
        (report, String::from_utf8(reporter.into_inner()).unwrap())
    }
}

#[tokio::test]
async fn scenario_a_identical_response_passes() {
    let h = Harness::start().await;
    write_fixture(h.root(), "net_version", "test_1.json", &fixture("net_version", json!([]), rpc_result(json!("5"))));
    answer(&h.candidate, "net_version", rpc_result(json!("5"))).await;

    let (report, out) = h.run(h.config(), SelectionFilter::default()).await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(
        report.total(),
        RunSummary { executed: 1, not_executed: 0, success: 1, failed: 0 }
    );
    assert!(out.contains("net_version/test_1.json ... OK"));
    assert!(out.contains("Number of executed tests:     1"));
    assert!(!h.output().exists());
}

#[tokio::test]
async fn scenario_b_mismatch_writes_three_artifacts() {
    let h = Harness::start().await;
    write_fixture(h.root(), "net_version", "test_1.json", &fixture("net_version", json!([]), rpc_result(json!("5"))));
    answer(&h.candidate, "net_version", rpc_result(json!("4"))).await;

    let (report, out) = h.run(h.config(), SelectionFilter::default()).await;

    assert_eq!(report.total().failed, 1);
    assert!(out.contains("FAILED"));
    let group = h.output().join("net_version");
    let actual: Value =
        serde_json::from_str(&std::fs::read_to_string(group.join("test_1-response.json")).unwrap()).unwrap();
    let expected: Value =
        serde_json::from_str(&std::fs::read_to_string(group.join("test_1-expected.json")).unwrap()).unwrap();
    let diff: Value =
        serde_json::from_str(&std::fs::read_to_string(group.join("test_1-diff.json")).unwrap()).unwrap();
    assert_eq!(actual["result"], "4");
    assert_eq!(expected["result"], "5");
    assert_eq!(diff["entries"][0]["path"], "result");
}

#[tokio::test]
async fn scenario_c_null_result_is_dont_care() {
    let h = Harness::start().await;
    write_fixture(
        h.root(),
        "eth_blockNumber",
        "test_01.json",
        &fixture("eth_blockNumber", json!([]), json!({"jsonrpc": "2.0", "id": 1, "result": null})),
    );
    answer(&h.candidate, "eth_blockNumber", rpc_result(json!("0x41b57c"))).await;

    let (report, _) = h.run(h.config(), SelectionFilter::default()).await;

    assert_eq!(report.total().success, 1);
    assert!(!h.output().exists());
}

#[tokio::test]
async fn scenario_d_missing_test_is_not_found() {
    let h = Harness::start().await;
    write_fixture(h.root(), "net_version", "test_1.json", &fixture("net_version", json!([]), rpc_result(json!("5"))));

    let filter = SelectionFilter::default().with_api("net_version").with_test(2);
    let (report, out) = h.run(h.config(), filter).await;

    assert_eq!(report.outcome, RunOutcome::NotFound);
    assert_eq!(report.exit_code(), 1);
    assert!(out.contains("test not found"));
    assert!(!out.contains("Number of"));
    assert!(h.candidate.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn abort_on_fail_executes_up_to_first_failure() {
    let h = Harness::start().await;
    for (file, chain) in [("test_01.json", "0x1"), ("test_02.json", "0x5"), ("test_03.json", "0x1")] {
        write_fixture(h.root(), "eth_chainId", file, &fixture("eth_chainId", json!([]), rpc_result(json!(chain))));
    }
    answer(&h.candidate, "eth_chainId", rpc_result(json!("0x1"))).await;

    let (report, _) = h.run(h.config(), SelectionFilter::default()).await;
    assert_eq!(report.outcome, RunOutcome::Aborted);
    assert_eq!(report.total().executed, 2);
    assert_eq!(report.exit_code(), 1);

    let (report, _) = h.run(h.config().continue_on_fail(), SelectionFilter::default()).await;
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(
        report.total(),
        RunSummary { executed: 3, not_executed: 0, success: 2, failed: 1 }
    );
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn exclusions_are_counted_as_not_executed() {
    let h = Harness::start().await;
    write_fixture(h.root(), "eth_chainId", "test_01.json", &fixture("eth_chainId", json!([]), rpc_result(json!("0x1"))));
    write_fixture(h.root(), "net_version", "test_01.json", &fixture("net_version", json!([]), rpc_result(json!("1"))));
    answer(&h.candidate, "net_version", rpc_result(json!("1"))).await;

    let filter = SelectionFilter::default().excluding_api("eth_chainId");
    let (report, _) = h.run(h.config(), filter).await;
    assert_eq!(
        report.total(),
        RunSummary { executed: 1, not_executed: 1, success: 1, failed: 0 }
    );
}

#[tokio::test]
async fn cross_compare_uses_reference_as_expected() {
    let h = Harness::start().await;
    write_fixture(
        h.root(),
        "eth_getBalance",
        "test_01.json",
        &json!([{"request": {"jsonrpc": "2.0", "method": "eth_getBalance", "params": ["0xabc", "latest"], "id": 1}}]),
    );
    answer(&h.candidate, "eth_getBalance", rpc_result(json!("0x10"))).await;
    answer(&h.reference, "eth_getBalance", rpc_result(json!("0x10"))).await;

    let (report, _) = h.run(h.config().cross_compare(), SelectionFilter::default()).await;
    assert_eq!(report.total().success, 1);
    assert_eq!(h.reference.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn engine_methods_go_to_control_plane() {
    let h = Harness::start().await;
    write_fixture(
        h.root(),
        "engine_exchangeCapabilities",
        "test_01.json",
        &fixture("engine_exchangeCapabilities", json!([[]]), rpc_result(json!([]))),
    );
    answer(&h.control, "engine_exchangeCapabilities", rpc_result(json!([]))).await;

    let (report, _) = h.run(h.config(), SelectionFilter::default()).await;
    assert_eq!(report.total().success, 1);
    assert!(h.candidate.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn json_error_body_is_a_response() {
    let h = Harness::start().await;
    let error = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "the method foo_bar does not exist"}});
    write_fixture(h.root(), "foo_bar", "test_01.json", &fixture("foo_bar", json!([]), error.clone()));
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error))
        .mount(&h.candidate)
        .await;

    let (report, _) = h.run(h.config(), SelectionFilter::default()).await;
    assert_eq!(report.total().success, 1);
}

#[tokio::test]
async fn report_files_reflect_the_run() {
    let h = Harness::start().await;
    write_fixture(h.root(), "net_version", "test_1.json", &fixture("net_version", json!([]), rpc_result(json!("5"))));
    write_fixture(h.root(), "net_version", "test_2.json", &fixture("net_version", json!([]), rpc_result(json!("6"))));
    answer(&h.candidate, "net_version", rpc_result(json!("5"))).await;

    let (report, _) = h.run(h.config().continue_on_fail(), SelectionFilter::default()).await;

    let json = report.to_json();
    assert_eq!(json["summary"]["failed"], 1);
    assert_eq!(json["tests"].as_array().unwrap().len(), 2);
    assert!(json["tests"][1]["artifacts"][0].as_str().unwrap().ends_with("test_2-diff.json"));

    let xml = report.to_junit_xml();
    assert!(xml.contains("tests=\"2\""));
    assert!(xml.contains("failures=\"1\""));
}
