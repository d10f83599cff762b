//! End-to-end scenarios for the session loop.
//!
//! A scripted provider stands in for the Messages API and records every
//! request it receives, so each test can check both what the session sent
//! and what it left in the conversation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_rs::agent::EventRecord;
use parley_rs::api::provider::ProviderFuture;
use parley_rs::api::{CompletionRequest, CompletionResponse, TokenCountRequest};
use parley_rs::error::{ProviderError, TokenCountError};
use parley_rs::prelude::*;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

// ── Mocks ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RecordedRequest {
    model: String,
    max_tokens: u32,
    system: Option<String>,
    messages: Vec<Message>,
    tools: Vec<String>,
}

/// Replays scripted responses in order. Once the script runs out every
/// request gets a plain "done" reply.
struct ScriptedProvider {
    script: Mutex<VecDeque<Result<CompletionResponse, ProviderError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<CompletionResponse, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl CompletionProvider for ScriptedProvider {
    fn create_message<'a>(
        &'a self,
        request: &'a CompletionRequest<'a>,
    ) -> ProviderFuture<'a, CompletionResponse, ProviderError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            model: request.model.to_string(),
            max_tokens: request.max_tokens,
            system: request.system.map(str::to_string),
            messages: request.messages.to_vec(),
            tools: request.tools.iter().map(|t| t.name.clone()).collect(),
        });
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(reply(vec![ContentBlock::text("done")])));
        Box::pin(async move { next })
    }
}

/// Charges a fixed number of tokens per message.
struct PerMessageCounter(u64);

impl TokenCounter for PerMessageCounter {
    fn count_tokens<'a>(
        &'a self,
        request: &'a TokenCountRequest<'a>,
    ) -> ProviderFuture<'a, u64, TokenCountError> {
        let n = request.messages.len() as u64 * self.0;
        Box::pin(async move { Ok(n) })
    }
}

#[derive(Deserialize, JsonSchema)]
struct SearchArgs {
    query: String,
}

#[derive(Deserialize, JsonSchema)]
struct NoArgs {}

fn tools(search_calls: Arc<Mutex<Vec<String>>>) -> ToolSet {
    ToolSet::new()
        .with(FnTool::new(
            ToolDescriptor::new("search", "Search the web", json_schema_for::<SearchArgs>()),
            move |args: SearchArgs| {
                let calls = search_calls.clone();
                async move {
                    calls.lock().unwrap().push(args.query.clone());
                    Ok(vec![ToolContent::text(format!("results for {}", args.query))])
                }
            },
        ))
        .with(FnTool::new(
            ToolDescriptor::new("hang", "Never returns", json_schema_for::<NoArgs>()),
            |_: NoArgs| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(vec![])
            },
        ))
}

fn reply(content: Vec<ContentBlock>) -> CompletionResponse {
    CompletionResponse {
        content,
        usage: Usage {
            input_tokens: 120,
            output_tokens: 30,
        },
        stop_reason: None,
    }
}

fn search_use(id: &str, query: &str) -> ContentBlock {
    ContentBlock::tool_use(id, "search", json!({ "query": query }))
}

fn rate_limited() -> ProviderError {
    ProviderError::Http {
        status: 429,
        body: r#"{"type":"error","error":{"type":"rate_limit_error"}}"#.into(),
    }
}

struct Harness {
    session: Session,
    provider: Arc<ScriptedProvider>,
    events: Arc<Mutex<Vec<EventRecord>>>,
    searches: Arc<Mutex<Vec<String>>>,
}

async fn harness(
    script: Vec<Result<CompletionResponse, ProviderError>>,
    settings: SessionSettings,
) -> Harness {
    harness_with(script, settings, Vec::new(), 10).await
}

async fn harness_with(
    script: Vec<Result<CompletionResponse, ProviderError>>,
    settings: SessionSettings,
    history: Vec<Message>,
    tokens_per_message: u64,
) -> Harness {
    let provider = ScriptedProvider::new(script);
    let events = Arc::new(Mutex::new(Vec::new()));
    let searches = Arc::new(Mutex::new(Vec::new()));

    let sink = events.clone();
    let session = Session::builder(
        provider.clone(),
        Arc::new(PerMessageCounter(tokens_per_message)),
        Arc::new(tools(searches.clone())),
    )
    .settings(settings)
    .history(history)
    .session_id("test-session")
    .event_handler(Arc::new(FnEventHandler::new(move |event| {
        sink.lock().unwrap().push(event.to_record());
    })))
    .build()
    .await
    .unwrap();

    Harness {
        session,
        provider,
        events,
        searches,
    }
}

fn settings() -> SessionSettings {
    SessionSettings::new("claude-sonnet-4-5-20250929", "You are helpful.")
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn plain_text_reply() {
    let mut h = harness(vec![Ok(reply(vec![ContentBlock::text("Hello!")]))], settings()).await;

    let outcome = h.session.process_query("hi").await.unwrap();
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.tool_calls, 0);
    assert_eq!(outcome.text, "Hello!");

    let conv = h.session.conversation().messages();
    assert_eq!(conv.len(), 2);
    assert_eq!(conv[0], Message::user("hi"));
    assert_eq!(conv[1].role, Role::Assistant);
    assert_eq!(conv[1].text(), "Hello!");

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "claude-sonnet-4-5-20250929");
    assert_eq!(requests[0].max_tokens, 2048);
    assert_eq!(requests[0].system.as_deref(), Some("You are helpful."));
    assert_eq!(requests[0].tools, vec!["hang", "search"]);

    let events = h.events.lock().unwrap();
    assert!(events.contains(&EventRecord::Message {
        message: Message::assistant("Hello!")
    }));
    assert!(events.contains(&EventRecord::TokenUsage {
        input_tokens: 120,
        output_tokens: 30
    }));
    assert_eq!(events.last(), Some(&EventRecord::Finished { rounds: 1 }));
}

#[tokio::test]
async fn tool_round_trip() {
    let mut h = harness(
        vec![
            Ok(reply(vec![
                ContentBlock::text("Let me look that up."),
                search_use("t1", "rust async"),
            ])),
            Ok(reply(vec![ContentBlock::text("Here is what I found.")])),
        ],
        settings(),
    )
    .await;

    let outcome = h.session.process_query("find rust async docs").await.unwrap();
    assert_eq!(outcome.rounds, 2);
    assert_eq!(outcome.tool_calls, 1);
    assert_eq!(*h.searches.lock().unwrap(), vec!["rust async"]);

    let expected = ContentBlock::tool_result(
        "t1",
        vec![
            ContentBlock::text("Tool \"search\" executed successfully. Results:"),
            ContentBlock::text("results for rust async"),
        ],
        false,
    );
    let conv = h.session.conversation().messages();
    assert_eq!(conv.len(), 4);
    assert_eq!(conv[1].blocks().len(), 2);
    assert_eq!(conv[2], Message::user_blocks(vec![expected.clone()]));
    assert_eq!(conv[3].text(), "Here is what I found.");

    // The second request carries the tool use and its result.
    let second = &h.provider.requests()[1];
    assert_eq!(second.messages.len(), 3);

    let events = h.events.lock().unwrap();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, EventRecord::ToolExecuting { name, .. } if name == "search"))
    );
    assert!(events.contains(&EventRecord::Message {
        message: Message::user_blocks(vec![expected])
    }));
}

#[tokio::test]
async fn tool_cap_stops_extra_calls() {
    let mut h = harness(
        vec![
            Ok(reply(vec![
                search_use("t1", "a"),
                search_use("t2", "b"),
                search_use("t3", "c"),
            ])),
            Ok(reply(vec![ContentBlock::text("Summary.")])),
        ],
        settings().with_max_tool_calls_per_query(2),
    )
    .await;

    let outcome = h.session.process_query("search three things").await.unwrap();
    assert!(outcome.hit_tool_limit);
    assert_eq!(outcome.tool_calls, 2);
    assert_eq!(*h.searches.lock().unwrap(), vec!["a", "b"]);

    let conv = h.session.conversation().messages();
    let assistant = conv[1].blocks();
    assert_eq!(assistant.len(), 3);
    assert!(
        assistant[2]
            .as_text()
            .unwrap()
            .starts_with("Too many tool calls in a single turn!")
    );
    // Only the accepted calls have results, and nothing is orphaned.
    assert_eq!(conv[2].blocks().len(), 2);
    assert!(parley_rs::context::orphaned_tool_uses(conv).is_empty());

    let events = h.events.lock().unwrap();
    assert!(events.contains(&EventRecord::ToolLimitReached { limit: 2 }));
}

#[tokio::test]
async fn tool_cap_counts_rounds() {
    let mut h = harness(
        vec![
            Ok(reply(vec![search_use("t1", "a")])),
            Ok(reply(vec![search_use("t2", "b"), search_use("t3", "c")])),
            Ok(reply(vec![ContentBlock::text("All three.")])),
        ],
        settings().with_max_tool_calls_per_query(2),
    )
    .await;

    let outcome = h.session.process_query("search in two rounds").await.unwrap();
    assert!(!outcome.hit_tool_limit);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(outcome.tool_calls, 3);
    assert_eq!(*h.searches.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(outcome.text, "All three.");
}

#[tokio::test]
async fn tool_cap_refuses_once_rounds_run_out() {
    let mut h = harness(
        vec![
            Ok(reply(vec![search_use("t1", "a")])),
            Ok(reply(vec![search_use("t2", "b")])),
            Ok(reply(vec![search_use("t3", "c")])),
        ],
        settings().with_max_tool_calls_per_query(2),
    )
    .await;

    let outcome = h.session.process_query("keep searching").await.unwrap();
    assert!(outcome.hit_tool_limit);
    assert_eq!(outcome.rounds, 3);
    assert_eq!(*h.searches.lock().unwrap(), vec!["a", "b"]);

    // The refused round ends the query with the warning and no tool use.
    let conv = h.session.conversation().messages();
    let last = conv.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.blocks().len(), 1);
    assert!(last.text().starts_with("Too many tool calls in a single turn!"));
    assert!(parley_rs::context::orphaned_tool_uses(conv).is_empty());
}

#[tokio::test(start_paused = true)]
async fn rate_limits_are_retried_with_linear_backoff() {
    let mut h = harness(
        vec![
            Err(rate_limited()),
            Err(rate_limited()),
            Ok(reply(vec![ContentBlock::text("Finally.")])),
        ],
        settings(),
    )
    .await;

    let start = tokio::time::Instant::now();
    let outcome = h.session.process_query("hi").await.unwrap();
    assert_eq!(outcome.text, "Finally.");
    assert_eq!(h.provider.requests().len(), 3);
    assert!(start.elapsed() >= Duration::from_millis(6000));

    let retries: Vec<_> = h
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            EventRecord::RetryScheduled {
                attempt, delay_ms, ..
            } => Some((*attempt, *delay_ms)),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(1, 2000), (2, 4000)]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_end_with_error_message() {
    let mut h = harness(
        vec![Err(rate_limited()), Err(rate_limited()), Err(rate_limited())],
        settings(),
    )
    .await;

    let err = h.session.process_query("hi").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::RetriesExhausted { attempts: 3, .. }
    ));

    let conv = h.session.conversation().messages();
    assert_eq!(conv.len(), 2);
    assert_eq!(conv[1].role, Role::Assistant);
    assert!(conv[1].text().starts_with("Rate limit exceeded after 3 attempts"));
}

#[tokio::test]
async fn non_transient_errors_are_not_retried() {
    let mut h = harness(
        vec![Err(ProviderError::Http {
            status: 400,
            body: r#"{"type":"error","error":{"type":"invalid_request_error","message":"tool_use id toolu_01A429 not found"}}"#.into(),
        })],
        settings(),
    )
    .await;

    assert!(matches!(
        h.session.process_query("hi").await,
        Err(SessionError::Provider(_))
    ));
    assert_eq!(h.provider.requests().len(), 1);
}

#[tokio::test]
async fn failure_after_tool_round_leaves_valid_conversation() {
    let mut h = harness(
        vec![
            Ok(reply(vec![search_use("t1", "rust async")])),
            Err(ProviderError::Http {
                status: 400,
                body: "invalid_request_error".into(),
            }),
        ],
        settings(),
    )
    .await;

    let err = h.session.process_query("find rust async docs").await.unwrap_err();
    let text = err.to_string();
    assert!(matches!(err, SessionError::Provider(_)));
    assert_eq!(h.provider.requests().len(), 2);

    let conv = h.session.conversation().messages();
    assert!(parley_rs::context::orphaned_tool_uses(conv).is_empty());
    assert_eq!(conv.len(), 4);
    assert_eq!(conv[3], Message::assistant(text.clone()));
    let error_messages = conv
        .iter()
        .filter(|m| m.role == Role::Assistant && m.text() == text)
        .count();
    assert_eq!(error_messages, 1);

    // The next query starts from a clean alternation.
    h.session.process_query("try again").await.unwrap();
    let retry = h.provider.requests().pop().unwrap();
    assert_eq!(retry.messages.last(), Some(&Message::user("try again")));
}

#[tokio::test(start_paused = true)]
async fn hanging_tool_times_out() {
    let mut h = harness(
        vec![
            Ok(reply(vec![ContentBlock::tool_use("t1", "hang", json!({}))])),
            Ok(reply(vec![ContentBlock::text("The tool timed out.")])),
        ],
        settings().with_tool_call_timeout_secs(5),
    )
    .await;

    h.session.process_query("call hang").await.unwrap();

    let conv = h.session.conversation().messages();
    match &conv[2].blocks()[0] {
        ContentBlock::ToolResult {
            is_error, content, ..
        } => {
            assert_eq!(*is_error, Some(true));
            assert!(format!("{content:?}").contains("timed out after 5s"));
        }
        other => panic!("expected tool result, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let mut h = harness(
        vec![Ok(reply(vec![ContentBlock::tool_use("t1", "nope", json!({}))]))],
        settings(),
    )
    .await;

    h.session.process_query("call nope").await.unwrap();

    let conv = h.session.conversation().messages();
    match &conv[2].blocks()[0] {
        ContentBlock::ToolResult {
            is_error, content, ..
        } => {
            assert_eq!(*is_error, Some(true));
            assert!(format!("{content:?}").contains("unknown tool 'nope'"));
        }
        other => panic!("expected tool result, got {other:?}"),
    }
}

#[tokio::test]
async fn queued_settings_apply_to_next_request() {
    let mut h = harness(vec![], settings()).await;

    h.session.process_query("first").await.unwrap();
    let updater = h.session.settings_updater();
    updater.update(SettingsUpdate::model("claude-opus-4-1"));
    updater.update(SettingsUpdate {
        max_output_tokens: Some(512),
        ..Default::default()
    });
    h.session.process_query("second").await.unwrap();

    let requests = h.provider.requests();
    assert_eq!(requests[0].model, "claude-sonnet-4-5-20250929");
    assert_eq!(requests[1].model, "claude-opus-4-1");
    assert_eq!(requests[1].max_tokens, 512);
}

#[tokio::test]
async fn reset_settings_restores_build_time_values() {
    let mut h = harness(vec![], settings()).await;

    h.session.update_settings(SettingsUpdate::model("claude-opus-4-1"));
    h.session
        .settings_updater()
        .update(SettingsUpdate::model("claude-haiku-4-5"));
    h.session.reset_settings();
    assert_eq!(h.session.settings().model, "claude-sonnet-4-5-20250929");

    // The queued update was dropped along with the direct one.
    h.session.process_query("hi").await.unwrap();
    assert_eq!(h.provider.requests()[0].model, "claude-sonnet-4-5-20250929");
}

#[tokio::test(start_paused = true)]
async fn oldest_messages_are_dropped_to_fit_budget() {
    let history = vec![
        Message::user("one"),
        Message::assistant("reply one"),
        Message::user("two"),
        Message::assistant("reply two"),
    ];
    let mut h = harness_with(
        vec![],
        settings()
            .with_max_context_tokens(3500)
            .with_safety_margin(1.0),
        history,
        1000,
    )
    .await;

    h.session.process_query("three").await.unwrap();

    let first = &h.provider.requests()[0];
    assert_eq!(first.messages.len(), 3);
    assert_eq!(first.messages[0], Message::user("two"));

    let events = h.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        EventRecord::ContextTruncated {
            removed: 2,
            remaining: 3,
            ..
        }
    )));
}

#[tokio::test]
async fn charged_sessions_report_usage() {
    let provider = ScriptedProvider::new(vec![]);
    let meter = Arc::new(UsageMeter::new());
    let mut session = Session::builder(
        provider,
        Arc::new(PerMessageCounter(10)),
        Arc::new(ToolSet::new()),
    )
    .settings(settings().with_charge_for_tokens(true))
    .billing(meter.clone())
    .build()
    .await
    .unwrap();

    session.process_query("hi").await.unwrap();
    let records = meter.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].input_tokens, 120);
    assert_eq!(records[0].events[0].name, "input-tokens-sonnet");
}

#[tokio::test]
async fn concurrent_query_is_rejected() {
    let h = harness(vec![], settings()).await;
    let handle = SessionHandle::new(h.session);

    let guard = handle.lock().await;
    assert!(matches!(
        handle.try_process("while busy").await,
        Err(SessionError::Busy)
    ));
    drop(guard);

    let outcome = handle.try_process("now").await.unwrap();
    assert_eq!(outcome.text, "done");
}
