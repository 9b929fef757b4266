//! The message loop: inbound messages → sessions → agentic loop → replies.
//!
//! Decision logic (quote prefixing, delivery policy, silence, warning
//! injection, attachment rendering) lives in pure functions in
//! [`decide`]; this module wires them together around the per-sender
//! processing slots.

pub mod attachments;
pub mod decide;
pub mod monitor;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use wisp_agent::agent_loop::{run_agent_loop, LoopDeps, LoopOutcome, LoopPolicy};
use wisp_agent::retry::RetryPolicy;
use wisp_agent::tools::build::build_registry;
use wisp_channels::types::{InboundMessage, OutboundReply};
use wisp_core::types::{SenderId, Source};
use wisp_core::WispError;

use crate::app::AppState;

/// Enqueue a message for its sender's serial processing slot.
///
/// Never blocks the channel: a saturated per-sender buffer fails fast with
/// `Backpressure` and the channel decides what to tell the platform.
pub fn submit(state: &Arc<AppState>, message: InboundMessage) -> Result<(), WispError> {
    let sender = message.sender_id.clone();
    state.touch_sender(&sender);

    let slot = state
        .slots
        .entry(sender.clone())
        .or_insert_with(|| spawn_sender_task(Arc::clone(state), sender.clone()))
        .clone();

    slot.try_send(message).map_err(|e| match e {
        mpsc::error::TrySendError::Full(_) => WispError::Backpressure {
            sender: sender.to_string(),
        },
        mpsc::error::TrySendError::Closed(_) => WispError::Internal(format!(
            "processing slot for '{sender}' is closed"
        )),
    })
}

/// One serial task per sender: debounce-coalesce, then process. Messages
/// from different senders interleave freely; within a sender they are
/// totally ordered.
fn spawn_sender_task(state: Arc<AppState>, sender: SenderId) -> mpsc::Sender<InboundMessage> {
    let buffer = state.config().agent.sender_buffer.max(1);
    let (tx, mut rx) = mpsc::channel::<InboundMessage>(buffer);

    tokio::spawn(async move {
        loop {
            let mut message = tokio::select! {
                _ = state.shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Some(m) => m,
                    None => break,
                },
            };

            // Coalescing window: every rapid follow-up restarts the grace
            // period and folds into the pending message.
            let grace = Duration::from_millis(state.config().agent.debounce_ms);
            loop {
                match tokio::time::timeout(grace, rx.recv()).await {
                    Ok(Some(next)) => message.coalesce(next),
                    Ok(None) | Err(_) => break,
                }
            }

            // Error confinement: one sender's failure never poisons another.
            if let Err(e) = process_message(&state, &sender, message).await {
                error!(sender = %sender, error = %e, "message processing failed");
            }
        }
        info!(sender = %sender, "sender task ended");
    });

    tx
}

/// The per-message pipeline.
#[instrument(skip(state, message), fields(sender = %sender, source = %message.source))]
async fn process_message(
    state: &Arc<AppState>,
    sender: &SenderId,
    mut message: InboundMessage,
) -> Result<(), WispError> {
    let config = state.config();
    let source = message.source.clone();
    let response_tx = message.response_tx.take();

    // Resolve provider before touching the session.
    let profile = match config.route(&source) {
        Ok(p) => p.clone(),
        Err(e) => {
            deliver_failure(state, sender, &source, response_tx, &e.to_string()).await;
            return Err(e);
        }
    };
    let provider = match state.provider(config.route_key(&source)) {
        Some(p) => p,
        None => {
            let e = WispError::UnknownProvider {
                name: config.route_key(&source).to_string(),
            };
            deliver_failure(state, sender, &source, response_tx, &e.to_string()).await;
            return Err(e);
        }
    };

    // Quote, attachments, warning — all before the user event lands.
    let mut text = decide::prefix_quote(&message.text, message.quote.as_deref());

    if state
        .sessions
        .take_pending_warning(sender)
        .await
        .map_err(|e| WispError::Session(e.to_string()))?
    {
        text = decide::inject_warning(&config.agent.warning_text, &text);
    }

    let content = attachments::compose_user_content(
        &text,
        &message.attachments,
        profile.supports_vision,
    );

    state
        .sessions
        .append_user(sender, content)
        .await
        .map_err(|e| WispError::Session(e.to_string()))?;

    // Run the loop.
    let registry = build_registry(
        &config,
        Arc::clone(&state.memory),
        state.embedder.clone(),
        Arc::clone(&provider),
        sender.as_str(),
    );
    let deps = LoopDeps {
        provider,
        profile: profile.clone(),
        registry,
        sessions: Arc::clone(&state.sessions),
        memory: Arc::clone(&state.memory),
        embedder: state.embedder.clone(),
        costs: Arc::clone(&state.costs),
        context: Arc::clone(&state.context),
    };
    let policy = LoopPolicy {
        max_turns: config.agent.max_turns,
        cost_ceiling_usd: config.agent.cost_ceiling_usd,
        call_deadline: Duration::from_secs(config.agent.call_deadline_secs),
        retry: RetryPolicy::default(),
    };

    let outcome = run_agent_loop(&deps, &policy, sender, &state.shutdown).await;

    // Context thresholds. Compaction first: a compaction that just bought
    // headroom also suppresses the warning check that follows it.
    if let Ok((total_tokens, _, _)) = state.sessions.totals(sender).await {
        if total_tokens as f64 > config.agent.hard_threshold * profile.context_window as f64 {
            info!(total_tokens, "hard threshold crossed, compacting");
            if let Err(e) = state.sessions.compact(sender).await {
                warn!(error = %e, "compaction failed");
            }
        }
    }
    if let Ok((total_tokens, compaction_count, warning_pending)) =
        state.sessions.totals(sender).await
    {
        if decide::should_warn_context(
            total_tokens,
            profile.context_window,
            config.agent.warn_threshold,
            warning_pending,
            compaction_count,
        ) {
            if let Err(e) = state.sessions.set_pending_warning(sender).await {
                warn!(error = %e, "failed to persist context warning");
            }
        }
    }

    let result = match outcome {
        Ok(outcome) => {
            let reply = outcome.text().to_string();
            deliver_reply(state, sender, &source, response_tx, &reply, &config).await;
            monitor::write_monitor(state, sender, &source, &reply);

            // System-sourced work closes its session on success so the next
            // system message starts clean; an error leaves it for retry.
            if source == Source::System && matches!(outcome, LoopOutcome::Reply(_)) {
                if let Err(e) = state.sessions.close(sender).await {
                    warn!(error = %e, "auto-close failed");
                } else {
                    state.slots.remove(sender);
                }
            }
            Ok(())
        }
        Err(e) => {
            deliver_failure(state, sender, &source, response_tx, &e.to_string()).await;
            monitor::write_monitor(state, sender, &source, "(error)");
            Err(WispError::LlmProvider(e.to_string()))
        }
    };

    result
}

/// Route a successful reply per the delivery policy.
async fn deliver_reply(
    state: &Arc<AppState>,
    sender: &SenderId,
    source: &Source,
    response_tx: Option<tokio::sync::oneshot::Sender<Result<String, String>>>,
    reply: &str,
    config: &wisp_core::WispConfig,
) {
    // HTTP gets its future completed whatever the delivery policy says —
    // the caller is waiting.
    if let Some(tx) = response_tx {
        let _ = tx.send(Ok(reply.to_string()));
        return;
    }

    if !decide::should_deliver(
        source,
        reply,
        &config.agent.silent_tokens,
        &config.agent.no_delivery_sources,
    ) {
        return;
    }

    let Some(channel) = state.channels.get(source.as_str()) else {
        warn!(source = %source, "no channel registered for delivering source");
        return;
    };
    let out = OutboundReply::text_to(sender.clone(), reply);
    if let Err(e) = channel.send(&out).await {
        warn!(error = %e, source = %source, "outbound delivery failed");
    }
}

/// Deliver a short generic error to the user; details stay in the log.
async fn deliver_failure(
    state: &Arc<AppState>,
    sender: &SenderId,
    source: &Source,
    response_tx: Option<tokio::sync::oneshot::Sender<Result<String, String>>>,
    detail: &str,
) {
    if let Some(tx) = response_tx {
        let _ = tx.send(Err(detail.to_string()));
        return;
    }
    if source.delivers_via_channel() {
        if let Some(channel) = state.channels.get(source.as_str()) {
            let out = OutboundReply::text_to(
                sender.clone(),
                "Something went wrong on my side — please try again.",
            );
            let _ = channel.send(&out).await;
        }
    }
}

/// Close a session on operator request: flush, archive, forget the slot.
pub async fn close_session(state: &Arc<AppState>, sender: &SenderId) -> Result<(), WispError> {
    state
        .sessions
        .close(sender)
        .await
        .map_err(|e| WispError::Session(e.to_string()))?;
    state.slots.remove(sender);
    Ok(())
}
