//! Reasoning envelopes and the per-family echo policies.
//!
//! Several backends return opaque reasoning state that has to be sent back,
//! unchanged, on later turns that carry tool calls. Each backend family has
//! its own shape, wire field and rejection behaviour; those differences live
//! in [`ENVELOPE_POLICIES`] so adapters and the invoker never branch on a
//! backend name.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::provider::{Message, MessageRole};

/// Opaque reasoning state captured from one assistant turn.
///
/// Contents are copied from the response body as-is. Block payloads are kept
/// as raw JSON so they serialize back byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEnvelope {
    /// Plain reasoning text mirrored into the next request.
    Text(String),
    /// Per-call signatures, in the order the backend emitted them.
    Signatures(Vec<CallSignature>),
    /// Ordered, typed reasoning blocks.
    Blocks(Vec<Box<RawValue>>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSignature {
    pub call_id: String,
    pub signature: String,
}

impl PartialEq for ReasoningEnvelope {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Signatures(a), Self::Signatures(b)) => a == b,
            (Self::Blocks(a), Self::Blocks(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.get() == y.get())
            }
            _ => false,
        }
    }
}

impl ReasoningEnvelope {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Signatures(signatures) => signatures.is_empty(),
            Self::Blocks(blocks) => blocks.is_empty(),
        }
    }

    pub fn shape(&self) -> EnvelopeShape {
        match self {
            Self::Text(_) => EnvelopeShape::MirroredText,
            Self::Signatures(_) => EnvelopeShape::CallSignatures,
            Self::Blocks(_) => EnvelopeShape::ReasoningBlocks,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Signature for `call_id`, when this envelope carries call signatures.
    pub fn signature_for(&self, call_id: &str) -> Option<&str> {
        match self {
            Self::Signatures(signatures) => signatures
                .iter()
                .find(|entry| entry.call_id == call_id)
                .map(|entry| entry.signature.as_str()),
            _ => None,
        }
    }

    pub fn blocks(&self) -> Option<&[Box<RawValue>]> {
        match self {
            Self::Blocks(blocks) => Some(blocks),
            _ => None,
        }
    }
}

/// Backend families grouped by how they preserve reasoning state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendFamily {
    /// Reasoning text mirrored on every assistant turn of a reasoning session.
    A,
    /// One opaque signature per function call.
    B,
    /// Ordered reasoning blocks on tool-call turns.
    C,
    /// No reasoning state to echo.
    D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeShape {
    None,
    MirroredText,
    CallSignatures,
    ReasoningBlocks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoRequirement {
    Never,
    /// Every assistant turn while reasoning mode is active.
    AssistantTurnsInReasoningMode,
    /// Assistant turns that carry tool calls.
    ToolCallTurns,
    /// Assistant turns that carry tool calls while reasoning mode is active.
    ToolCallTurnsInReasoningMode,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvelopePolicy {
    pub family: BackendFamily,
    pub shape: EnvelopeShape,
    /// Field that carries the envelope on the wire.
    pub wire_field: Option<&'static str>,
    pub required_when: EchoRequirement,
    /// Minimal value the backend accepts when nothing was captured.
    pub placeholder: Option<&'static str>,
    /// Lowercase fragments of the upstream error raised when the envelope is missing.
    pub rejection_markers: &'static [&'static str],
}

pub const ENVELOPE_POLICIES: [EnvelopePolicy; 4] = [
    EnvelopePolicy {
        family: BackendFamily::A,
        shape: EnvelopeShape::MirroredText,
        wire_field: Some("reasoning_content"),
        required_when: EchoRequirement::AssistantTurnsInReasoningMode,
        // mirrored text must stay non-empty on tool-call turns
        placeholder: Some("."),
        rejection_markers: &["reasoning_content"],
    },
    EnvelopePolicy {
        family: BackendFamily::B,
        shape: EnvelopeShape::CallSignatures,
        wire_field: Some("thoughtSignature"),
        required_when: EchoRequirement::ToolCallTurns,
        placeholder: Some("skip_thought_signature_validator"),
        rejection_markers: &[
            "thought_signature",
            "thoughtsignature",
            "function call missing signature",
        ],
    },
    EnvelopePolicy {
        family: BackendFamily::C,
        shape: EnvelopeShape::ReasoningBlocks,
        wire_field: Some("reasoning_details"),
        required_when: EchoRequirement::ToolCallTurnsInReasoningMode,
        placeholder: Some(r#"{"type":"reasoning.text","text":"","format":"unknown","index":0}"#),
        rejection_markers: &[
            "reasoning_details",
            "reasoning details must be preserved",
        ],
    },
    EnvelopePolicy {
        family: BackendFamily::D,
        shape: EnvelopeShape::None,
        wire_field: None,
        required_when: EchoRequirement::Never,
        placeholder: None,
        rejection_markers: &[],
    },
];

pub fn policy_for(family: BackendFamily) -> &'static EnvelopePolicy {
    match family {
        BackendFamily::A => &ENVELOPE_POLICIES[0],
        BackendFamily::B => &ENVELOPE_POLICIES[1],
        BackendFamily::C => &ENVELOPE_POLICIES[2],
        BackendFamily::D => &ENVELOPE_POLICIES[3],
    }
}

impl EnvelopePolicy {
    pub fn is_required(&self, has_tool_calls: bool, reasoning_mode: bool) -> bool {
        match self.required_when {
            EchoRequirement::Never => false,
            EchoRequirement::AssistantTurnsInReasoningMode => reasoning_mode,
            EchoRequirement::ToolCallTurns => has_tool_calls,
            EchoRequirement::ToolCallTurnsInReasoningMode => has_tool_calls && reasoning_mode,
        }
    }

    /// Whether an upstream error body is this family's missing-envelope rejection.
    pub fn is_rejection(&self, body: &str) -> bool {
        if self.rejection_markers.is_empty() {
            return false;
        }
        let lower = body.to_ascii_lowercase();
        self.rejection_markers
            .iter()
            .any(|marker| lower.contains(marker))
    }

    /// Ensure every assistant turn that needs an envelope carries one.
    ///
    /// Envelopes of a foreign shape are dropped. Turns whose requirement is
    /// unmet get the family placeholder. Captured envelopes are never touched.
    /// Returns how many placeholders were synthesized.
    pub fn prepare(&self, messages: &mut [Message], reasoning_mode: bool) -> usize {
        let mut synthesized = 0;
        for message in messages
            .iter_mut()
            .filter(|message| message.role == MessageRole::Assistant)
        {
            if message
                .envelope
                .as_ref()
                .is_some_and(|envelope| envelope.shape() != self.shape)
            {
                message.envelope = None;
            }

            if !self.is_required(message.has_tool_calls(), reasoning_mode) {
                continue;
            }

            if message
                .envelope
                .as_ref()
                .is_some_and(|envelope| !envelope.is_empty())
            {
                continue;
            }

            if let Some(placeholder) = self.placeholder_for(message) {
                message.envelope = Some(placeholder);
                synthesized += 1;
            }
        }
        synthesized
    }

    fn placeholder_for(&self, message: &Message) -> Option<ReasoningEnvelope> {
        let placeholder = self.placeholder?;
        match self.shape {
            EnvelopeShape::None => None,
            EnvelopeShape::MirroredText => Some(ReasoningEnvelope::Text(placeholder.to_owned())),
            EnvelopeShape::CallSignatures => {
                // The backend only validates the first call of a turn.
                let first = message.tool_calls.as_ref()?.first()?;
                Some(ReasoningEnvelope::Signatures(vec![CallSignature {
                    call_id: first.id.clone(),
                    signature: placeholder.to_owned(),
                }]))
            }
            EnvelopeShape::ReasoningBlocks => RawValue::from_string(placeholder.to_owned())
                .ok()
                .map(|block| ReasoningEnvelope::Blocks(vec![block])),
        }
    }
}
