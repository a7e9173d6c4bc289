//! Turn input assembly ( step 4): a header followed by each
//! pending envelope rendered as a small field block, separated by `---`.

use chrono::TimeZone;

use hiboss_core::types::Envelope;

pub fn render_turn_input(envelopes: &[Envelope], now_ms: i64) -> String {
    let mut out = format!("now: {}\npending-envelopes: {}\n", format_ms(now_ms), envelopes.len());
    for envelope in envelopes {
        out.push_str("---\n");
        out.push_str(&render_envelope(envelope));
    }
    out
}

fn render_envelope(envelope: &Envelope) -> String {
    let mut out = format!("from: {}\n", envelope.from);

    let sender = envelope
        .metadata
        .as_ref()
        .and_then(|m| m.from_name.clone().or_else(|| m.author.clone()));
    if let Some(sender) = sender {
        out.push_str(&format!("sender: {sender}\n"));
    }

    if let Some(channel_message_id) = envelope.metadata.as_ref().and_then(|m| m.channel_message_id.clone()) {
        out.push_str(&format!("channel-message-id: {channel_message_id}\n"));
    }

    out.push_str(&format!("created-at: {}\n\n", format_ms(envelope.created_at)));

    if let Some(text) = &envelope.content_text {
        out.push_str(text);
        out.push('\n');
    }

    if !envelope.content_attachments.is_empty() {
        let names: Vec<String> = envelope
            .content_attachments
            .iter()
            .map(|a| a.filename.clone().unwrap_or_else(|| a.source.clone()))
            .collect();
        out.push_str(&format!("attachments: {}\n", names.join(", ")));
    }

    out
}

fn format_ms(ms: i64) -> String {
    chrono::Utc
        .timestamp_millis_opt(ms)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use hiboss_core::types::{Attachment, EnvelopeMetadata, EnvelopeStatus};

    use super::*;

    fn make_envelope(from: &str, text: &str, metadata: Option<EnvelopeMetadata>) -> Envelope {
        Envelope {
            id: "e1".to_string(),
            from: from.to_string(),
            to: "agent:nex".to_string(),
            from_boss: false,
            content_text: Some(text.to_string()),
            content_attachments: vec![],
            metadata,
            deliver_at: None,
            status: EnvelopeStatus::Pending,
            created_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn header_reports_the_envelope_count() {
        let envelopes = vec![make_envelope("agent:scheduler", "hi", None), make_envelope("agent:scheduler", "again", None)];
        let rendered = render_turn_input(&envelopes, 1_700_000_000_500);
        assert!(rendered.starts_with("now: "));
        assert!(rendered.contains("pending-envelopes: 2"));
        assert_eq!(rendered.matches("---").count(), 2);
    }

    #[test]
    fn sender_and_channel_message_id_are_rendered_when_present() {
        let metadata = EnvelopeMetadata {
            from_name: Some("Alice".to_string()),
            channel_message_id: Some("456".to_string()),
            ..Default::default()
        };
        let envelopes = vec![make_envelope("channel:telegram:1", "hello", Some(metadata))];
        let rendered = render_turn_input(&envelopes, 1_700_000_000_500);
        assert!(rendered.contains("sender: Alice"));
        assert!(rendered.contains("channel-message-id: 456"));
        assert!(rendered.contains("hello"));
    }

    #[test]
    fn attachments_are_listed_by_filename_or_source() {
        let mut envelope = make_envelope("agent:scheduler", "see attached", None);
        envelope.content_attachments = vec![
            Attachment { source: "/tmp/a.png".to_string(), filename: Some("a.png".to_string()) },
            Attachment { source: "/tmp/b.pdf".to_string(), filename: None },
        ];
        let rendered = render_turn_input(std::slice::from_ref(&envelope), 1_700_000_000_500);
        assert!(rendered.contains("attachments: a.png, /tmp/b.pdf"));
    }
}
