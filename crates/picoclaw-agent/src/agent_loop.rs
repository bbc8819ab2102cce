//! Agent loop — the LLM ↔ tool-calling state machine behind every reply.
//!
//! Consumes inbound messages serially (there is at most one in-flight LLM
//! iteration per process), routes each to an agent and session, drives the
//! bounded tool-calling iteration through the provider fallback chain, and
//! publishes responses outbound. Context-window errors trigger emergency
//! compression and a bounded retry; long sessions are summarized in the
//! background after the reply is out.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, error, info, warn};

use picoclaw_core::bus::{
    is_internal_channel, meta, InboundMessage, MediaPart, MessageBus, OutboundMediaMessage,
    OutboundMessage, Peer, PeerKind,
};
use picoclaw_core::media::MediaStore;
use picoclaw_core::router::{parse_agent_session_key, RouteInput, Router};
use picoclaw_core::state::StateManager;
use picoclaw_core::types::{LlmResponse, Message, ToolCall, ToolDefinition};
use picoclaw_core::utils::truncate;
use picoclaw_providers::{
    is_context_error_text, resolve_candidates, CooldownTracker, FallbackChain, ProviderError,
    ProviderLookup,
};

use crate::commands::{parse_command, Command};
use crate::instance::{AgentInstance, AgentRegistry};
use crate::summarize::{
    force_compress, should_summarize, summarize_messages, SummarizeGate, KEEP_RECENT_MESSAGES,
};

/// History window loaded per message.
const HISTORY_WINDOW: usize = 50;

/// Maximum compression retries after a context-window error.
const MAX_CONTEXT_RETRIES: usize = 2;

/// User-facing announcement on the first compression retry.
const CONTEXT_RETRY_NOTICE: &str = "Context window exceeded. Compressing history and retrying...";

/// Argument preview length in status messages.
const ARGS_PREVIEW_CHARS: usize = 100;

/// Looks up a channel's reasoning sub-chat id, if it has one.
pub type ReasoningLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// A unit of work for [`AgentLoop::process`].
struct ProcessRequest {
    channel: String,
    chat_id: String,
    sender_id: String,
    content: String,
    session_key: Option<String>,
    route: RouteInput,
    /// Run background summarization after the reply.
    enable_summary: bool,
    /// Publish the final response (and tool output) outbound.
    deliver: bool,
}

/// The main agent loop.
pub struct AgentLoop {
    bus: Arc<MessageBus>,
    agents: Arc<AgentRegistry>,
    router: Router,
    providers: Arc<dyn ProviderLookup>,
    chain: FallbackChain,
    state: Arc<StateManager>,
    media: MediaStore,
    /// Provider applied to bare model refs.
    default_provider: String,
    /// Substitute for an empty final response.
    default_response: String,
    gate: Arc<SummarizeGate>,
    /// Enabled channel names, for `/list channels`.
    channel_names: Vec<String>,
    reasoning_lookup: Option<ReasoningLookup>,
}

impl AgentLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<MessageBus>,
        agents: Arc<AgentRegistry>,
        router: Router,
        providers: Arc<dyn ProviderLookup>,
        state: Arc<StateManager>,
        media: MediaStore,
        default_provider: String,
    ) -> Self {
        Self {
            bus,
            agents,
            router,
            providers,
            chain: FallbackChain::new(Arc::new(CooldownTracker::new())),
            state,
            media,
            default_provider,
            default_response: "I've completed processing but have no response to give.".into(),
            gate: Arc::new(SummarizeGate::new()),
            channel_names: Vec::new(),
            reasoning_lookup: None,
        }
    }

    /// Set the enabled channel names shown by `/list channels`.
    pub fn with_channel_names(mut self, names: Vec<String>) -> Self {
        self.channel_names = names;
        self
    }

    /// Set the reasoning sub-chat lookup.
    pub fn with_reasoning_lookup(mut self, lookup: ReasoningLookup) -> Self {
        self.reasoning_lookup = Some(lookup);
        self
    }

    /// The shared cooldown tracker (for status displays).
    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        self.chain.cooldowns()
    }

    // ─────────────────────────────────────────
    // Entry points
    // ─────────────────────────────────────────

    /// Consume inbound messages until the bus closes.
    pub async fn run(&self) {
        info!("agent loop started, waiting for messages");
        loop {
            match self.bus.consume_inbound().await {
                Some(msg) => self.handle_inbound(msg).await,
                None => {
                    info!("inbound bus closed, agent loop exiting");
                    break;
                }
            }
        }
    }

    /// One-shot processing for the CLI. Returns the final response text
    /// without publishing it outbound.
    pub async fn process_direct(&self, content: &str, session_key: &str) -> Result<String> {
        let request = ProcessRequest {
            channel: "cli".into(),
            chat_id: "direct".into(),
            sender_id: "user".into(),
            content: content.to_string(),
            session_key: Some(session_key.to_string()),
            route: RouteInput {
                channel: "cli".into(),
                peer: Peer::direct("user"),
                ..Default::default()
            },
            enable_summary: true,
            deliver: false,
        };
        self.process(request).await
    }

    /// Processing on behalf of a channel — used by cron, heartbeat, and
    /// device events. The response is returned, not auto-delivered.
    pub async fn process_direct_with_channel(
        &self,
        channel: &str,
        chat_id: &str,
        content: &str,
        session_key: Option<String>,
    ) -> Result<String> {
        let request = ProcessRequest {
            channel: channel.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: channel.to_string(),
            content: content.to_string(),
            session_key,
            route: RouteInput {
                channel: channel.to_string(),
                peer: Peer::direct(chat_id),
                ..Default::default()
            },
            enable_summary: false,
            deliver: false,
        };
        self.process(request).await
    }

    // ─────────────────────────────────────────
    // Inbound dispatch
    // ─────────────────────────────────────────

    async fn handle_inbound(&self, msg: InboundMessage) {
        debug!(channel = %msg.channel, sender = %msg.sender_id, "received message");

        if let Err(e) = self.dispatch(&msg).await {
            error!(channel = %msg.channel, error = %e, "message processing error");
            let (channel, chat_id) = self.error_target(&msg);
            if !is_internal_channel(&channel) {
                self.bus.publish_outbound(OutboundMessage::new(
                    channel,
                    chat_id,
                    format!("Error processing message: {e}"),
                ));
            }
        }
    }

    /// Where a processing error should be announced.
    fn error_target(&self, msg: &InboundMessage) -> (String, String) {
        if msg.channel == "system" {
            if let Some((channel, chat_id)) = msg.chat_id.split_once(':') {
                return (channel.to_string(), chat_id.to_string());
            }
        }
        (msg.channel.clone(), msg.chat_id.clone())
    }

    async fn dispatch(&self, msg: &InboundMessage) -> Result<()> {
        // System branch: subagent/cron completions re-entering the loop.
        if msg.channel == "system" {
            return self.process_system_message(msg).await;
        }

        // Command branch: immediate responses, no LLM.
        if let Some(command) = parse_command(&msg.content) {
            let response = self.execute_command(command, msg).await;
            self.bus
                .publish_outbound(OutboundMessage::new(&msg.channel, &msg.chat_id, response));
            return Ok(());
        }

        let request = ProcessRequest {
            channel: msg.channel.clone(),
            chat_id: msg.chat_id.clone(),
            sender_id: msg.sender_id.clone(),
            content: msg.content.clone(),
            session_key: msg.session_key.clone(),
            route: route_input_from(msg),
            enable_summary: true,
            deliver: true,
        };
        self.process(request).await.map(|_| ())
    }

    /// A `system` message carries a background result addressed to
    /// `"<origin_channel>:<origin_chat_id>"` in its chat id. Internal
    /// origins are logged only; real origins re-enter the loop as a
    /// synthetic user turn so the agent decides how to notify.
    async fn process_system_message(&self, msg: &InboundMessage) -> Result<()> {
        let (origin_channel, origin_chat_id) = msg
            .chat_id
            .split_once(':')
            .map(|(c, i)| (c.to_string(), i.to_string()))
            .ok_or_else(|| anyhow!("invalid system message chat_id: {}", msg.chat_id))?;

        if is_internal_channel(&origin_channel) {
            let result = msg
                .content
                .split_once("Result:\n")
                .map(|(_, body)| body)
                .unwrap_or(&msg.content);
            info!(origin = %msg.chat_id, result = %truncate(result, 200), "background task finished (internal origin)");
            return Ok(());
        }

        let request = ProcessRequest {
            channel: origin_channel.clone(),
            chat_id: origin_chat_id.clone(),
            sender_id: msg.sender_id.clone(),
            content: format!("[System: {}] {}", msg.sender_id, msg.content),
            session_key: None,
            route: RouteInput {
                channel: origin_channel,
                peer: Peer::direct(origin_chat_id),
                ..Default::default()
            },
            enable_summary: false,
            deliver: true,
        };
        self.process(request).await.map(|_| ())
    }

    // ─────────────────────────────────────────
    // Core processing
    // ─────────────────────────────────────────

    async fn process(&self, request: ProcessRequest) -> Result<String> {
        // Routing: an explicit session key wins; otherwise the router
        // decides agent and session.
        let (agent, session_key) = self.resolve(&request);
        debug!(
            agent = %agent.id,
            session_key = %session_key,
            sender = %request.sender_id,
            "routed"
        );

        // Every contextual tool learns the current conversation; the
        // message tool additionally resets its per-round sent flag.
        agent.tools.set_context_all(&request.channel, &request.chat_id).await;
        agent.message_tool.reset_round();

        if !is_internal_channel(&request.channel) {
            self.state.record_last_channel(&request.channel, &request.chat_id);
        }

        // Assemble the LLM context and persist the user turn.
        let history = agent.sessions.history(&session_key, HISTORY_WINDOW);
        let summary = agent.sessions.summary(&session_key);
        let mut messages = agent.context.build_messages(
            &history,
            &summary,
            &request.content,
            &request.channel,
            &request.chat_id,
        );
        agent
            .sessions
            .add_message(&session_key, Message::user(&request.content));

        let final_content = self
            .run_iterations(&agent, &session_key, &mut messages, &request)
            .await?;

        let content = if final_content.trim().is_empty() {
            self.default_response.clone()
        } else {
            final_content
        };

        agent
            .sessions
            .add_message(&session_key, Message::assistant(&content));

        if request.enable_summary {
            self.maybe_summarize(&agent, &session_key);
        }

        // Deliver unless a tool already sent a user-facing message to this
        // conversation during the round.
        if request.deliver && !agent.message_tool.has_sent_in_round() {
            self.bus.publish_outbound(OutboundMessage::new(
                &request.channel,
                &request.chat_id,
                &content,
            ));
        }

        Ok(content)
    }

    fn resolve(&self, request: &ProcessRequest) -> (Arc<AgentInstance>, String) {
        if let Some(key) = &request.session_key {
            let agent = parse_agent_session_key(key)
                .and_then(|(agent_id, _)| self.agents.get(&agent_id))
                .unwrap_or_else(|| self.agents.default_agent());
            return (agent, key.clone());
        }

        let route = self.router.resolve(&request.route);
        let agent = self
            .agents
            .get(&route.agent_id)
            .unwrap_or_else(|| self.agents.default_agent());
        (agent, route.session_key)
    }

    /// The bounded LLM ↔ tool iteration.
    async fn run_iterations(
        &self,
        agent: &Arc<AgentInstance>,
        session_key: &str,
        messages: &mut Vec<Message>,
        request: &ProcessRequest,
    ) -> Result<String> {
        let tool_defs = agent.tools.get_definitions();
        let mut context_retries = 0usize;
        let mut final_content = String::new();

        'iterations: for iteration in 0..agent.max_iterations.max(1) {
            // LLM invocation with the compression retry path.
            let response = loop {
                match self.call_llm(agent, messages, &tool_defs).await {
                    Ok(response) => break response,
                    Err(e) => {
                        let text = e.to_string();
                        if is_context_error_text(&text) && context_retries < MAX_CONTEXT_RETRIES {
                            context_retries += 1;
                            warn!(retry = context_retries, "context window error, compressing");
                            if context_retries == 1 && !is_internal_channel(&request.channel) {
                                self.bus.publish_outbound(OutboundMessage::new(
                                    &request.channel,
                                    &request.chat_id,
                                    CONTEXT_RETRY_NOTICE,
                                ));
                            }
                            let (compressed, dropped) = force_compress(messages);
                            debug!(dropped = dropped, "force compression applied");
                            *messages = compressed;
                            continue;
                        }
                        return Err(e);
                    }
                }
            };

            self.forward_reasoning(&request.channel, &response);

            if !response.has_tool_calls() {
                final_content = response.content.unwrap_or_default();
                break 'iterations;
            }

            // Normalize and record the assistant turn.
            let mut calls = response.tool_calls.clone();
            for call in &mut calls {
                normalize_tool_call(call);
            }
            let assistant = Message::assistant_tool_calls(response.content.clone(), calls.clone());
            messages.push(assistant.clone());
            agent.sessions.add_full_message(session_key, assistant);

            // Run each requested tool in order.
            for call in &calls {
                debug!(tool = %call.function.name, iteration = iteration, "executing tool call");

                if request.deliver {
                    self.bus.publish_outbound(OutboundMessage::status(
                        &request.channel,
                        &request.chat_id,
                        format!(
                            "Thinking... 🔨 Executing: {}({})",
                            call.function.name,
                            truncate(&call.function.arguments, ARGS_PREVIEW_CHARS)
                        ),
                    ));
                }

                let params: HashMap<String, serde_json::Value> =
                    serde_json::from_str(&call.function.arguments).unwrap_or_default();
                let result = agent.tools.execute(&call.function.name, params).await;

                if !result.silent && request.deliver {
                    if let Some(for_user) = &result.for_user {
                        if !for_user.is_empty() {
                            self.bus.publish_outbound(OutboundMessage::new(
                                &request.channel,
                                &request.chat_id,
                                for_user,
                            ));
                        }
                    }
                }

                if !result.media.is_empty() && request.deliver {
                    self.publish_media(&request.channel, &request.chat_id, &result.media);
                }

                let tool_message = Message::tool_result(&call.id, &result.for_llm);
                messages.push(tool_message.clone());
                agent.sessions.add_full_message(session_key, tool_message);
            }
        }

        Ok(final_content)
    }

    /// Invoke the provider — through the fallback chain when the agent has
    /// more than one candidate.
    async fn call_llm(
        &self,
        agent: &Arc<AgentInstance>,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let providers = &self.providers;
        let lookup = |alias: &str| providers.alias_candidate(alias);
        let candidates = resolve_candidates(
            &agent.model(),
            &agent.fallbacks,
            &self.default_provider,
            Some(&lookup),
        );
        if candidates.is_empty() {
            bail!("no model configured for agent '{}'", agent.id);
        }

        let tools = if tool_defs.is_empty() {
            None
        } else {
            Some(tool_defs)
        };

        if candidates.len() == 1 {
            let candidate = &candidates[0];
            let provider = self
                .providers
                .get(&candidate.provider)
                .ok_or_else(|| anyhow!("no provider configured for '{}'", candidate.provider))?;
            return provider
                .chat(messages, tools, &candidate.model, &agent.options)
                .await
                .map_err(|e| anyhow!(e));
        }

        let options = agent.options.clone();
        let providers = self.providers.clone();
        self.chain
            .execute(&candidates, |provider_name, model| {
                let providers = providers.clone();
                let options = options.clone();
                let messages = messages.to_vec();
                let tool_defs: Option<Vec<ToolDefinition>> = tools.map(|t| t.to_vec());
                async move {
                    match providers.get(&provider_name) {
                        Some(provider) => {
                            provider
                                .chat(&messages, tool_defs.as_deref(), &model, &options)
                                .await
                        }
                        None => Err(ProviderError::Network(format!(
                            "no provider configured for '{provider_name}'"
                        ))),
                    }
                }
            })
            .await
            .map_err(|e| anyhow!(e))
    }

    /// Mirror the model's reasoning trace to the channel's reasoning
    /// sub-chat, best-effort.
    fn forward_reasoning(&self, channel: &str, response: &LlmResponse) {
        let reasoning = match &response.reasoning_content {
            Some(r) if !r.trim().is_empty() => r.clone(),
            _ => return,
        };
        let lookup = match &self.reasoning_lookup {
            Some(l) => l,
            None => return,
        };
        if let Some(reasoning_chat) = lookup(channel) {
            self.bus.publish_outbound(OutboundMessage::status(
                channel,
                reasoning_chat,
                reasoning,
            ));
        }
    }

    fn publish_media(&self, channel: &str, chat_id: &str, refs: &[String]) {
        let parts: Vec<MediaPart> = refs
            .iter()
            .filter_map(|media_ref| {
                let entry = self.media.resolve_with_meta(media_ref)?;
                let kind = entry
                    .meta
                    .content_type
                    .as_deref()
                    .and_then(|ct| ct.split('/').next())
                    .map(|k| k.to_string());
                Some(MediaPart {
                    media_ref: media_ref.clone(),
                    filename: entry.meta.filename,
                    content_type: entry.meta.content_type,
                    kind,
                    caption: None,
                })
            })
            .collect();

        if parts.is_empty() {
            warn!(chat_id = %chat_id, "no resolvable media refs in tool result");
            return;
        }
        self.bus
            .publish_outbound_media(OutboundMediaMessage::new(channel, chat_id, parts));
    }

    /// Kick off background summarization when the session has outgrown the
    /// thresholds. Coalesced per session key.
    fn maybe_summarize(&self, agent: &Arc<AgentInstance>, session_key: &str) {
        let history = agent.sessions.history(session_key, usize::MAX);
        if !should_summarize(&history, agent.context_window) {
            return;
        }
        if !self.gate.try_begin(session_key) {
            return;
        }

        // The summarizer uses the agent's primary candidate.
        let lookup = |alias: &str| self.providers.alias_candidate(alias);
        let candidates = resolve_candidates(
            &agent.model(),
            &agent.fallbacks,
            &self.default_provider,
            Some(&lookup),
        );
        let provider = candidates
            .first()
            .and_then(|c| self.providers.get(&c.provider));
        let (provider, model) = match (provider, candidates.first()) {
            (Some(p), Some(c)) => (p, c.model.clone()),
            _ => {
                self.gate.finish(session_key);
                return;
            }
        };

        let sessions = agent.sessions.clone();
        let gate = self.gate.clone();
        let key = session_key.to_string();
        let context_window = agent.context_window;

        tokio::spawn(async move {
            let keep_from = history.len().saturating_sub(KEEP_RECENT_MESSAGES);
            let foldable = &history[..keep_from];

            match summarize_messages(provider.as_ref(), &model, foldable, context_window).await {
                Ok(summary) => {
                    sessions.set_summary(&key, summary);
                    sessions.truncate_history(&key, KEEP_RECENT_MESSAGES);
                    info!(session_key = %key, "session summarized");
                }
                Err(e) => {
                    warn!(session_key = %key, error = %e, "summarization failed");
                }
            }
            gate.finish(&key);
        });
    }

    // ─────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────

    async fn execute_command(&self, command: Command, msg: &InboundMessage) -> String {
        let route = route_input_from(msg);
        let agent = {
            let resolved = self.router.resolve(&route);
            self.agents
                .get(&resolved.agent_id)
                .unwrap_or_else(|| self.agents.default_agent())
        };

        match command {
            Command::ShowModel => format!("Current model: {}", agent.model()),
            Command::ShowChannel => format!("Current channel: {}", msg.channel),
            Command::ShowAgents | Command::ListAgents => {
                format!("Agents: {}", self.agents.ids().join(", "))
            }
            Command::ListModels => {
                let names = self.providers.group_names();
                if names.is_empty() {
                    "No models configured.".into()
                } else {
                    format!("Models: {}", names.join(", "))
                }
            }
            Command::ListChannels => {
                if self.channel_names.is_empty() {
                    "No channels enabled.".into()
                } else {
                    format!("Channels: {}", self.channel_names.join(", "))
                }
            }
            Command::SwitchModel(name) => {
                let known = self.providers.alias_candidate(&name).is_some()
                    || name.contains('/')
                    || self.providers.get(&name).is_some();
                if known {
                    agent.set_model(&name);
                    format!("Switched model to {name}")
                } else {
                    format!("Unknown model: {name}")
                }
            }
            Command::SwitchChannel(name) => {
                if !self.channel_names.is_empty() && !self.channel_names.contains(&name) {
                    format!("Unknown channel: {name}")
                } else {
                    self.state.record_last_channel(&name, &msg.chat_id);
                    format!("Switched channel to {name}")
                }
            }
        }
    }
}

/// Build routing input from an inbound message's metadata.
fn route_input_from(msg: &InboundMessage) -> RouteInput {
    let parent_peer = match (msg.meta(meta::PARENT_PEER_KIND), msg.meta(meta::PARENT_PEER_ID)) {
        (Some(kind), Some(id)) => Some(Peer {
            kind: match kind {
                "group" => PeerKind::Group,
                "channel" => PeerKind::Channel,
                _ => PeerKind::Direct,
            },
            id: id.to_string(),
        }),
        _ => None,
    };

    RouteInput {
        channel: msg.channel.clone(),
        account_id: msg.meta(meta::ACCOUNT_ID).unwrap_or_default().to_string(),
        peer: msg.peer.clone(),
        parent_peer,
        guild_id: msg.meta(meta::GUILD_ID).unwrap_or_default().to_string(),
        team_id: msg.meta(meta::TEAM_ID).unwrap_or_default().to_string(),
    }
}

/// Ensure a tool call's arguments are serialized JSON.
fn normalize_tool_call(call: &mut ToolCall) {
    let args = call.function.arguments.trim();
    if args.is_empty() {
        call.function.arguments = "{}".to_string();
    } else if serde_json::from_str::<serde_json::Value>(args).is_err() {
        // Wrap unparseable arguments as a JSON string so the round-trip
        // through the session stays valid.
        call.function.arguments = serde_json::Value::String(args.to_string()).to_string();
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
