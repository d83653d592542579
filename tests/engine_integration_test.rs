//! 引擎端到端测试：脚本化模型 + 记录/失败型工具与检索替身

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aigent::broker::{AgentEvent, BrokerConfig, EventBroker, Subscription, AGENT_EVENT_NAME};
use aigent::core::{AgentError, AgentStatus, Backends, BackendError, Engine, EngineConfig, RecoveryError};
use aigent::llm::{LlmError, MockLlmClient};
use aigent::retrieval::{InMemoryRetriever, RetrievalError, Retriever, SearchResult};
use aigent::tools::{EchoTool, Tool, ToolExecutor, ToolRegistry};
use async_trait::async_trait;
use serde_json::{json, Value};

struct RecordingTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        "recorder"
    }

    fn description(&self) -> &str {
        "Records every call"
    }

    async fn execute(&self, input: &str) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("recorded {input}"))
    }
}

struct FlakyTool;

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn execute(&self, _input: &str) -> Result<String, String> {
        Err("service unavailable".to_string())
    }
}

/// 只接受包含 hello 的输入
struct PickyTool;

#[async_trait]
impl Tool for PickyTool {
    fn name(&self) -> &str {
        "picky"
    }

    fn description(&self) -> &str {
        "Needs context from a previous step"
    }

    async fn execute(&self, input: &str) -> Result<String, String> {
        if input.contains("hello") {
            Ok(format!("picked {input}"))
        } else {
            Err(format!("cannot handle '{input}'"))
        }
    }
}

struct FailingRetriever;

#[async_trait]
impl Retriever for FailingRetriever {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<SearchResult>, RetrievalError> {
        Err(RetrievalError::Backend("index offline".to_string()))
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    }
}

fn plan(thought: &str, steps: Value) -> String {
    json!({ "thought": thought, "steps": steps }).to_string()
}

fn tools(calls: &Arc<AtomicUsize>) -> Arc<ToolExecutor> {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool).unwrap();
    registry.register(RecordingTool { calls: Arc::clone(calls) }).unwrap();
    registry.register(FlakyTool).unwrap();
    registry.register(PickyTool).unwrap();
    Arc::new(ToolExecutor::new(registry, 5))
}

async fn drain(mut subscription: Subscription) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_secs(2), subscription.recv_frame()).await
    {
        if frame.event.as_deref() == Some(AGENT_EVENT_NAME) {
            events.push(frame.agent_event().unwrap());
        }
    }
    events
}

fn terminal_count(events: &[AgentEvent]) -> usize {
    events.iter().filter(|e| e.status.is_terminal()).count()
}

#[tokio::test]
async fn test_arithmetic_scenario_emits_single_completed_event() {
    let llm = Arc::new(MockLlmClient::scripted(vec![
        plan(
            "solve arithmetic",
            json!([{ "action": "reason", "parameters": { "prompt": "2+2" }, "continue": false }]),
        ),
        "4".to_string(),
    ]));
    let broker = EventBroker::spawn(BrokerConfig::default());
    let subscription = broker.subscribe("observer").await.unwrap();
    let engine = Engine::new(
        Backends::new(llm.clone()),
        EngineConfig {
            relevance_threshold: 0.0,
            ..config()
        },
    )
    .with_broker(broker.clone());

    let answer = engine.execute("2+2 is what?").await.unwrap();
    assert_eq!(answer, "4");
    assert_eq!(llm.prompts()[1], "2+2");

    broker.shutdown().await;
    let events = drain(subscription).await;
    assert_eq!(terminal_count(&events), 1);
    let last = events.last().unwrap();
    assert_eq!(last.status, AgentStatus::Completed);
    assert_eq!(last.payload.as_ref().unwrap()["result"], "4");

    let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["start", "think_1", "plan_1", "execute_1", "step_1_start", "step_1_complete", "complete"]
    );
}

#[tokio::test]
async fn test_default_gate_rejects_arithmetic_plan() {
    let arithmetic = plan(
        "solve arithmetic",
        json!([{ "action": "reason", "parameters": { "prompt": "2+2" }, "continue": false }]),
    );
    let llm = Arc::new(MockLlmClient::scripted(vec![arithmetic.clone(), arithmetic.clone(), arithmetic]));
    let engine = Engine::new(Backends::new(llm.clone()), config());

    let err = engine.execute("2+2 is what?").await.unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert!(err.to_string().contains("not relevant"));
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn test_unregistered_tool_rejected_before_any_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bad = plan(
        "search the web for news",
        json!([{ "action": "tool_call", "parameters": { "tool_name": "search", "input": "news" }, "continue": false }]),
    );
    let llm = Arc::new(MockLlmClient::scripted(vec![bad.clone(), bad.clone(), bad]));
    let engine = Engine::new(Backends::new(llm.clone()).with_tools(tools(&calls)), config());

    match engine.execute("search the web for news").await.unwrap_err() {
        AgentError::Validation { step, reason } => {
            assert_eq!(step, Some(1));
            assert!(reason.contains("'search'"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // 只有 3 次思考调用，没有执行阶段的模型调用
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn test_retry_prompt_after_extraction_failure() {
    let llm = Arc::new(MockLlmClient::scripted(vec![
        "I am not sure what you mean.".to_string(),
        plan(
            "explain borrowing rules",
            json!([{ "action": "reason", "parameters": { "prompt": "borrowing" }, "continue": false }]),
        ),
        "Shared or exclusive, never both.".to_string(),
    ]));
    let engine = Engine::new(Backends::new(llm.clone()), config());

    let answer = engine.execute("explain borrowing").await.unwrap();
    assert_eq!(answer, "Shared or exclusive, never both.");

    let prompts = llm.prompts();
    assert!(!prompts[0].contains("rejected"));
    assert!(prompts[1].contains("Your previous execution plan was rejected: extraction error"));
    assert!(prompts[1].contains("Attempt: 2"));
    assert!(prompts[1].contains("Query: explain borrowing"));
}

#[tokio::test]
async fn test_plan_attempts_exhausted() {
    let llm = Arc::new(MockLlmClient::scripted(vec!["nope", "still nope", "no plan", "unused"]));
    let broker = EventBroker::spawn(BrokerConfig::default());
    let subscription = broker.subscribe("observer").await.unwrap();
    let engine = Engine::new(Backends::new(llm.clone()), config()).with_broker(broker.clone());

    let err = engine.execute("anything at all").await.unwrap_err();
    assert!(matches!(err, AgentError::Extraction(_)));
    assert_eq!(llm.call_count(), 3);

    broker.shutdown().await;
    let events = drain(subscription).await;
    let rejected: Vec<&str> = events
        .iter()
        .filter(|e| e.id.starts_with("plan_rejected_"))
        .map(|e| e.id.as_str())
        .collect();
    assert_eq!(rejected, vec!["plan_rejected_1_1", "plan_rejected_1_2", "plan_rejected_1_3"]);
    assert_eq!(terminal_count(&events), 1);
    let last = events.last().unwrap();
    assert_eq!(last.status, AgentStatus::Error);
    assert_eq!(last.payload.as_ref().unwrap()["kind"], "ExtractionError");
}

#[tokio::test]
async fn test_model_failure_during_think_is_not_retried() {
    let llm = Arc::new(MockLlmClient::scripted_results(vec![Err(LlmError::Request(
        "connection refused".to_string(),
    ))]));
    let engine = Engine::new(Backends::new(llm.clone()), config());

    let err = engine.execute("explain traits").await.unwrap_err();
    assert!(matches!(err, AgentError::Backend(BackendError::Model(_))));
    assert_eq!(llm.call_count(), 1);
}

#[tokio::test]
async fn test_recovery_failure_is_fatal() {
    let calls = Arc::new(AtomicUsize::new(0));
    let llm = Arc::new(MockLlmClient::scripted(vec![plan(
        "use the flaky tool",
        json!([{ "action": "tool_call", "parameters": { "tool_name": "flaky", "input": "x" }, "continue": false }]),
    )]));
    let engine = Engine::new(Backends::new(llm).with_tools(tools(&calls)), config());

    let err = engine.execute("use flaky tool").await.unwrap_err();
    assert_eq!(err.kind(), "RecoveryFailedError");
    match err {
        AgentError::RecoveryFailed {
            step,
            original,
            recovery,
        } => {
            assert_eq!(step, 1);
            assert!(original.to_string().contains("service unavailable"));
            assert!(matches!(
                recovery,
                RecoveryError::ToolAlternativesExhausted { attempts: 1, .. }
            ));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_retrieval_recovery_failure_is_fatal() {
    let llm = Arc::new(MockLlmClient::scripted(vec![plan(
        "look up rust ownership",
        json!([{ "action": "retrieval_search", "parameters": { "query": "rust ownership rules" }, "continue": false }]),
    )]));
    let engine = Engine::new(
        Backends::new(llm).with_retriever(Arc::new(FailingRetriever)),
        config(),
    );

    match engine.execute("rust ownership").await.unwrap_err() {
        AgentError::RecoveryFailed { recovery, .. } => {
            // 原查询 + 截尾查询
            assert!(matches!(
                recovery,
                RecoveryError::QueryAlternativesExhausted { attempts: 2 }
            ));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_tool_recovery_uses_history() {
    let calls = Arc::new(AtomicUsize::new(0));
    let llm = Arc::new(MockLlmClient::scripted(vec![plan(
        "greet then pick",
        json!([
            { "action": "tool_call", "parameters": { "tool_name": "echo", "input": "hello" }, "continue": true },
            { "action": "tool_call", "parameters": { "tool_name": "picky", "input": "greet" }, "continue": false }
        ]),
    )]));
    let broker = EventBroker::spawn(BrokerConfig::default());
    let subscription = broker.subscribe("observer").await.unwrap();
    let engine = Engine::new(Backends::new(llm).with_tools(tools(&calls)), config())
        .with_broker(broker.clone());

    let answer = engine.execute("greet and pick").await.unwrap();
    assert_eq!(answer, "picked greet hello");

    broker.shutdown().await;
    let events = drain(subscription).await;
    let failed = events.iter().find(|e| e.id == "step_2_failed").unwrap();
    assert_eq!(failed.status, AgentStatus::Executing);
    let recovered = events.iter().find(|e| e.id == "step_2_recovered").unwrap();
    assert_eq!(recovered.status, AgentStatus::Executing);
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(events.last().unwrap().status, AgentStatus::Completed);
}

#[tokio::test]
async fn test_reason_recovery_restates_prompt_and_history() {
    let llm = Arc::new(MockLlmClient::scripted_results(vec![
        Ok(plan(
            "explain lifetimes",
            json!([{ "action": "reason", "parameters": { "prompt": "explain lifetimes" }, "continue": false }]),
        )),
        Err(LlmError::Timeout(60)),
        Ok("Lifetimes bound references.".to_string()),
    ]));
    let engine = Engine::new(Backends::new(llm.clone()), config());

    let answer = engine.execute("explain lifetimes").await.unwrap();
    assert_eq!(answer, "Lifetimes bound references.");
    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[2].contains("Original question: explain lifetimes"));
    assert!(prompts[2].contains("Execution history: (empty)"));
}

#[tokio::test]
async fn test_continue_false_stops_before_remaining_steps() {
    let calls = Arc::new(AtomicUsize::new(0));
    let llm = Arc::new(MockLlmClient::scripted(vec![plan(
        "record three things",
        json!([
            { "action": "tool_call", "parameters": { "tool_name": "recorder", "input": "one" }, "continue": false },
            { "action": "tool_call", "parameters": { "tool_name": "recorder", "input": "two" }, "continue": true },
            { "action": "tool_call", "parameters": { "tool_name": "recorder", "input": "three" }, "continue": false }
        ]),
    )]));
    let engine = Engine::new(Backends::new(llm).with_tools(tools(&calls)), config());

    let answer = engine.execute("record three things").await.unwrap();
    assert_eq!(answer, "recorded one");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_iteration_budget_exceeded() {
    let llm = Arc::new(MockLlmClient::scripted(vec![
        plan(
            "keep going forever",
            json!([{ "action": "reason", "parameters": { "prompt": "next" }, "continue": true }]),
        ),
        "first result".to_string(),
        plan(
            "refine the first result",
            json!([{ "action": "reason", "parameters": { "prompt": "again" }, "continue": true }]),
        ),
        "second result".to_string(),
    ]));
    let engine = Engine::new(
        Backends::new(llm.clone()),
        EngineConfig {
            max_iterations: 2,
            ..config()
        },
    );

    let err = engine.execute("keep going").await.unwrap_err();
    assert!(matches!(err, AgentError::IterationBudgetExceeded(2)));
    // 上一轮的结果成为下一轮的查询
    let prompts = llm.prompts();
    assert!(prompts[2].contains("Query: first result"));
    assert!(prompts[2].contains("Iteration: 2"));
}

#[tokio::test]
async fn test_second_iteration_plan_judged_against_previous_result() {
    let llm = Arc::new(MockLlmClient::scripted(vec![
        plan(
            "explain rust ownership step by step",
            json!([{ "action": "reason", "parameters": { "prompt": "ownership basics" }, "continue": true }]),
        ),
        "borrow checker moves values".to_string(),
        plan(
            "summarize borrow checker moves",
            json!([{ "action": "reason", "parameters": { "prompt": "summarize" }, "continue": false }]),
        ),
        "Values have one owner.".to_string(),
    ]));
    let broker = EventBroker::spawn(BrokerConfig::default());
    let subscription = broker.subscribe("observer").await.unwrap();
    let engine = Engine::new(Backends::new(llm.clone()), config()).with_broker(broker.clone());

    let answer = engine.execute("explain rust ownership").await.unwrap();
    assert_eq!(answer, "Values have one owner.");
    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 4);
    assert!(prompts[2].contains("Query: borrow checker moves values"));

    broker.shutdown().await;
    let events = drain(subscription).await;
    assert!(events.iter().all(|e| !e.id.starts_with("plan_rejected_")));
    assert!(events.iter().any(|e| e.id == "plan_2"));
}

#[tokio::test]
async fn test_rejection_event_ids_carry_iteration() {
    let llm = Arc::new(MockLlmClient::scripted(vec![
        plan(
            "start the task",
            json!([{ "action": "reason", "parameters": { "prompt": "begin" }, "continue": true }]),
        ),
        "partial draft".to_string(),
        "not a plan".to_string(),
        plan(
            "polish the partial draft",
            json!([{ "action": "reason", "parameters": { "prompt": "polish" }, "continue": false }]),
        ),
        "final draft".to_string(),
    ]));
    let broker = EventBroker::spawn(BrokerConfig::default());
    let subscription = broker.subscribe("observer").await.unwrap();
    let engine = Engine::new(Backends::new(llm), config()).with_broker(broker.clone());

    assert_eq!(engine.execute("start the task").await.unwrap(), "final draft");

    broker.shutdown().await;
    let events = drain(subscription).await;
    let rejected: Vec<&str> = events
        .iter()
        .filter(|e| e.id.starts_with("plan_rejected_"))
        .map(|e| e.id.as_str())
        .collect();
    assert_eq!(rejected, vec!["plan_rejected_2_1"]);
}

#[tokio::test]
async fn test_run_timeout() {
    let llm = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(500)));
    let broker = EventBroker::spawn(BrokerConfig::default());
    let subscription = broker.subscribe("observer").await.unwrap();
    let engine = Engine::new(
        Backends::new(llm),
        EngineConfig {
            timeout: Duration::from_millis(50),
            ..config()
        },
    )
    .with_broker(broker.clone());

    let err = engine.execute("slow question").await.unwrap_err();
    assert!(matches!(err, AgentError::Timeout(_)));
    assert_eq!(err.kind(), "TimeoutError");

    broker.shutdown().await;
    let events = drain(subscription).await;
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(events.last().unwrap().payload.as_ref().unwrap()["kind"], "TimeoutError");
}

#[tokio::test]
async fn test_retrieval_step_with_memory_backend() {
    let retriever = Arc::new(InMemoryRetriever::new());
    retriever.add_document("tokio", "tokio is an async runtime for rust").unwrap();
    retriever.add_document("serde", "serde serializes rust data structures").unwrap();
    let llm = Arc::new(MockLlmClient::scripted(vec![plan(
        "search docs about async runtime",
        json!([{ "action": "retrieval_search", "parameters": { "query": "async runtime", "top_k": 1 }, "continue": false }]),
    )]));
    let engine = Engine::new(Backends::new(llm).with_retriever(retriever), config());

    let answer = engine.execute("async runtime").await.unwrap();
    assert!(answer.starts_with("1. ["));
    assert!(answer.contains("tokio is an async runtime"));
    assert_eq!(answer.lines().count(), 1);
}

#[tokio::test]
async fn test_invalid_top_k_rejected() {
    let bad = plan(
        "search docs about async runtime",
        json!([{ "action": "retrieval_search", "parameters": { "query": "async runtime", "top_k": 0 }, "continue": false }]),
    );
    let llm = Arc::new(MockLlmClient::scripted(vec![bad.clone(), bad.clone(), bad]));
    let engine = Engine::new(
        Backends::new(llm).with_retriever(Arc::new(InMemoryRetriever::new())),
        config(),
    );

    let err = engine.execute("async runtime").await.unwrap_err();
    assert!(err.to_string().contains("top_k"));
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let engine = Arc::new(Engine::new(Backends::new(Arc::new(MockLlmClient::new())), config()));
    let (a, b) = tokio::join!(engine.execute("explain ownership"), engine.execute("explain generics"));
    assert_eq!(a.unwrap(), "Mock answer: explain ownership");
    assert_eq!(b.unwrap(), "Mock answer: explain generics");
}
