//! Plan-Execute 编排引擎
//!
//! 每轮迭代：Thinking（请求计划，解析 / 校验 / 相关性检查失败则带失败原因重新提示，
//! 至多 max_plan_attempts 次）→ Planning → Executing（按顺序执行步骤，失败交给 RecoveryEngine）。
//! 某步 continue=false 即得到最终答案；否则该轮结果成为下一轮查询，直至 max_iterations。
//! 整次运行受一个总超时约束，超时时正在等待的后端调用被丢弃。
//!
//! 每个阶段切换都会发布事件（若配置了 EventBroker）并写日志；每次运行恰好一个终态事件。

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::broker::{AgentEvent, EventBroker};
use crate::core::recovery::{RecoveryConfig, RecoveryEngine};
use crate::core::state::{AgentStatus, IterationState, StepOutcome};
use crate::core::{AgentError, BackendError};
use crate::llm::LlmClient;
use crate::planner::prompts::{retry_prompt, think_prompt};
use crate::planner::{parse_plan, ActionKind, ParamError, Plan, RelevanceGate, Step};
use crate::retrieval::{format_results, Retriever};
use crate::tools::ToolExecutor;

const RESULT_PREVIEW_CHARS: usize = 500;

/// 运行参数
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_iterations: usize,
    /// 整次运行的超时
    pub timeout: Duration,
    /// Think 阶段总尝试次数（含第一次）
    pub max_plan_attempts: usize,
    pub relevance_threshold: f64,
    /// 检索步骤未给 top_k 时的默认值
    pub default_top_k: usize,
    pub recovery: RecoveryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            timeout: Duration::from_secs(300),
            max_plan_attempts: 3,
            relevance_threshold: crate::planner::relevance::DEFAULT_RELEVANCE_THRESHOLD,
            default_top_k: 5,
            recovery: RecoveryConfig::default(),
        }
    }
}

/// 注入的外部后端；工具与检索可缺省，计划用到未配置的后端会在校验阶段被拒绝
#[derive(Clone)]
pub struct Backends {
    pub llm: Arc<dyn LlmClient>,
    pub tools: Option<Arc<ToolExecutor>>,
    pub retriever: Option<Arc<dyn Retriever>>,
}

impl Backends {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            tools: None,
            retriever: None,
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.as_ref().map(|t| t.tool_names()).unwrap_or_default()
    }
}

/// 编排引擎；多个 execute 可并发，各自独立
pub struct Engine {
    backends: Backends,
    config: EngineConfig,
    gate: RelevanceGate,
    recovery: RecoveryEngine,
    broker: Option<EventBroker>,
}

impl Engine {
    pub fn new(backends: Backends, config: EngineConfig) -> Self {
        Self {
            gate: RelevanceGate::new(config.relevance_threshold),
            recovery: RecoveryEngine::new(config.recovery.clone()),
            backends,
            config,
            broker: None,
        }
    }

    pub fn with_broker(mut self, broker: EventBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn broker(&self) -> Option<&EventBroker> {
        self.broker.as_ref()
    }

    /// 运行一个目标，返回最终答案
    pub async fn execute(&self, goal: &str) -> Result<String, AgentError> {
        let run = Run {
            engine: self,
            id: uuid::Uuid::new_v4().simple().to_string(),
        };
        tracing::info!(run_id = %run.id, goal = %goal, "run started");
        run.emit("start", AgentStatus::Thinking, "starting task", json!({ "goal": goal }));

        let result = match tokio::time::timeout(self.config.timeout, run.iterate(goal)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(self.config.timeout)),
        };

        match &result {
            Ok((answer, iterations)) => {
                run.emit(
                    "complete",
                    AgentStatus::Completed,
                    "task completed",
                    json!({ "result": answer, "iterations": iterations }),
                );
            }
            Err(e) => {
                tracing::error!(run_id = %run.id, kind = e.kind(), error = %e, "run failed");
                run.emit(
                    "error",
                    AgentStatus::Error,
                    e.to_string(),
                    json!({ "kind": e.kind() }),
                );
            }
        }
        result.map(|(answer, _)| answer)
    }

    /// 结构解析之后、执行之前的检查：参数类型、工具已注册、后端已配置、
    /// 与本轮提示词中的查询相关
    pub fn check_plan(&self, plan: &Plan, query: &str) -> Result<(), AgentError> {
        for (i, step) in plan.steps.iter().enumerate() {
            self.check_step(i + 1, step)?;
        }
        self.gate.check(query, &plan.thought)
    }

    fn check_step(&self, n: usize, step: &Step) -> Result<(), AgentError> {
        let params = &step.parameters;
        let param_err = |e: ParamError| AgentError::step_validation(n, e.to_string());
        match step.action {
            ActionKind::ToolCall => {
                let tools = self.backends.tools.as_ref().ok_or_else(|| {
                    AgentError::step_validation(n, "tool_call step but no tool backend is configured")
                })?;
                let name = params.non_empty_str("tool_name").map_err(param_err)?;
                params.str("input").map_err(param_err)?;
                if !tools.contains(name) {
                    return Err(AgentError::step_validation(
                        n,
                        format!(
                            "tool '{name}' is not registered (available: {})",
                            tools.tool_names().join(", ")
                        ),
                    ));
                }
            }
            ActionKind::RetrievalSearch => {
                if self.backends.retriever.is_none() {
                    return Err(AgentError::step_validation(
                        n,
                        "retrieval_search step but no retrieval backend is configured",
                    ));
                }
                params.non_empty_str("query").map_err(param_err)?;
                if let Some(k) = params.opt_f64("top_k").map_err(param_err)? {
                    if k < 1.0 || k.fract() != 0.0 {
                        return Err(AgentError::step_validation(
                            n,
                            format!("top_k must be a positive integer, got {k}"),
                        ));
                    }
                }
            }
            ActionKind::Reason => {
                params.non_empty_str("prompt").map_err(param_err)?;
            }
        }
        Ok(())
    }

    /// 执行单个步骤（不含恢复）
    pub async fn execute_step(&self, step: &Step) -> Result<String, BackendError> {
        let params = &step.parameters;
        match step.action {
            ActionKind::ToolCall => {
                let tools = self
                    .backends
                    .tools
                    .as_ref()
                    .ok_or(BackendError::NotConfigured("tool"))?;
                let name = params.str("tool_name").unwrap_or_default();
                let input = params.str("input").unwrap_or_default();
                Ok(tools.execute(name, input).await?)
            }
            ActionKind::RetrievalSearch => {
                let retriever = self
                    .backends
                    .retriever
                    .as_ref()
                    .ok_or(BackendError::NotConfigured("retrieval"))?;
                let query = params.str("query").unwrap_or_default();
                let top_k = params
                    .opt_f64("top_k")
                    .ok()
                    .flatten()
                    .map(|k| k as usize)
                    .unwrap_or(self.config.default_top_k);
                let results = retriever.search(query, top_k).await?;
                Ok(format_results(&results))
            }
            ActionKind::Reason => {
                let prompt = params.str("prompt").unwrap_or_default();
                Ok(self.backends.llm.generate(prompt).await?)
            }
        }
    }
}

/// 单次运行的上下文（事件都带上 run_id）
struct Run<'a> {
    engine: &'a Engine,
    id: String,
}

impl Run<'_> {
    fn emit(&self, event_id: &str, status: AgentStatus, message: impl Into<String>, payload: Value) {
        let message = message.into();
        tracing::info!(run_id = %self.id, event_id = %event_id, status = %status, message = %message, "agent event");
        let Some(broker) = &self.engine.broker else {
            return;
        };
        let mut payload = payload;
        if let Value::Object(map) = &mut payload {
            map.insert("run_id".to_string(), Value::String(self.id.clone()));
        }
        broker.publish_event(AgentEvent::new(event_id, status, message).with_payload(payload));
    }

    /// 迭代直到得到最终答案，返回 (答案, 用掉的轮数)
    async fn iterate(&self, goal: &str) -> Result<(String, usize), AgentError> {
        let max_iterations = self.engine.config.max_iterations;
        let tool_names = self.engine.backends.tool_names();
        let mut state = IterationState::new(goal);

        while state.iteration_count < max_iterations {
            let n = state.begin_iteration();
            self.emit(
                &format!("think_{n}"),
                AgentStatus::Thinking,
                format!("iteration {n}: analysing query"),
                json!({ "iteration": n, "query": state.current_query }),
            );
            let plan = self.think(&state, &tool_names).await?;

            self.emit(
                &format!("plan_{n}"),
                AgentStatus::Planning,
                format!("plan ready with {} step(s)", plan.steps.len()),
                json!({ "iteration": n, "plan": plan }),
            );
            self.emit(
                &format!("execute_{n}"),
                AgentStatus::Executing,
                "executing plan",
                json!({ "iteration": n }),
            );

            let outcome = self.execute_plan(&plan, &mut state).await?;
            if !outcome.should_continue {
                return Ok((outcome.result, n));
            }
            state.current_query = outcome.result;
        }

        Err(AgentError::IterationBudgetExceeded(max_iterations))
    }

    /// 有上限的重试循环；模型调用失败直接返回，不算作计划被拒
    async fn think(&self, state: &IterationState, tool_names: &[String]) -> Result<Plan, AgentError> {
        let engine = self.engine;
        let max_attempts = engine.config.max_plan_attempts.max(1);
        let n = state.iteration_count;
        let mut last_error: Option<AgentError> = None;

        for attempt in 1..=max_attempts {
            let prompt = match &last_error {
                None => think_prompt(&state.current_query, n, tool_names),
                Some(e) => retry_prompt(&state.current_query, n, attempt, tool_names, &e.to_string()),
            };
            tracing::debug!(run_id = %self.id, iteration = n, attempt, prompt = %prompt, "think prompt");

            let raw = engine
                .backends
                .llm
                .generate(&prompt)
                .await
                .map_err(BackendError::from)?;
            tracing::debug!(run_id = %self.id, iteration = n, attempt, response = %raw, "model response");

            let checked = parse_plan(&raw).and_then(|plan| {
                engine.check_plan(&plan, &state.current_query)?;
                Ok(plan)
            });
            match checked {
                Ok(plan) => return Ok(plan),
                Err(e) if e.is_plan_rejection() => {
                    tracing::warn!(run_id = %self.id, iteration = n, attempt, kind = e.kind(), error = %e, "plan rejected");
                    self.emit(
                        &format!("plan_rejected_{n}_{attempt}"),
                        AgentStatus::Thinking,
                        e.to_string(),
                        json!({ "iteration": n, "attempt": attempt, "kind": e.kind() }),
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::validation("no plan was produced")))
    }

    async fn execute_plan(&self, plan: &Plan, state: &mut IterationState) -> Result<StepOutcome, AgentError> {
        let mut outcome = StepOutcome {
            result: String::new(),
            should_continue: true,
        };

        for (i, step) in plan.steps.iter().enumerate() {
            let n = i + 1;
            self.emit(
                &format!("step_{n}_start"),
                AgentStatus::Executing,
                format!("step {n}: {}", step.action),
                json!({ "step": n, "action": step.action, "parameters": step.parameters }),
            );

            let result = match self.engine.execute_step(step).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(run_id = %self.id, step = n, action = %step.action, error = %err, "step failed");
                    self.emit(
                        &format!("step_{n}_failed"),
                        AgentStatus::Executing,
                        format!("step {n} failed: {err}"),
                        json!({ "step": n, "error": err.to_string() }),
                    );
                    match self
                        .engine
                        .recovery
                        .recover(&self.engine.backends, step, &err, &state.execution_history)
                        .await
                    {
                        Ok(recovered) => {
                            self.emit(
                                &format!("step_{n}_recovered"),
                                AgentStatus::Executing,
                                format!("step {n} recovered"),
                                json!({ "step": n, "result": preview(&recovered) }),
                            );
                            recovered
                        }
                        Err(recovery) => {
                            return Err(AgentError::RecoveryFailed {
                                step: n,
                                original: err,
                                recovery,
                            })
                        }
                    }
                }
            };

            state.execution_history.push(result.clone());
            self.emit(
                &format!("step_{n}_complete"),
                AgentStatus::Executing,
                format!("step {n} complete"),
                json!({ "step": n, "result": preview(&result), "continue": step.should_continue }),
            );
            outcome = StepOutcome {
                result,
                should_continue: step.should_continue,
            };
            if !step.should_continue {
                break;
            }
        }

        Ok(outcome)
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > RESULT_PREVIEW_CHARS {
        format!("{}...", text.chars().take(RESULT_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}
