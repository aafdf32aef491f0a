//! Tests for message types.

use super::*;

#[test]
fn test_message_builder() {
    let message = Message::new("test body".into())
        .with_extension(Bytes::from_static(b"<ArrayOfHeaderInfo />"))
        .with_label("order-placed".to_string())
        .with_correlation_id("corr-123".to_string());

    assert_eq!(message.body, Bytes::from("test body"));
    assert_eq!(message.extension, Bytes::from_static(b"<ArrayOfHeaderInfo />"));
    assert_eq!(message.label, Some("order-placed".to_string()));
    assert_eq!(message.correlation_id, Some("corr-123".to_string()));
}

#[test]
fn test_message_id_rejects_blank_input() {
    assert!("".parse::<MessageId>().is_err());
    assert!("   ".parse::<MessageId>().is_err());

    let id: MessageId = "abc\\42".parse().unwrap();
    assert_eq!(id.as_str(), "abc\\42");
}

#[test]
fn test_generated_ids_are_unique_and_carry_sequence() {
    let first = MessageId::generate(7);
    let second = MessageId::generate(7);

    assert_ne!(first, second);
    assert!(first.as_str().ends_with("\\7"));
}

#[test]
fn test_assigned_copy_keeps_payload() {
    let original = Message::new("body".into()).with_extension("headers".into());
    let assigned = original.assigned(MessageId::generate(3), LookupId::new(3));

    assert_eq!(assigned.lookup_id, LookupId::new(3));
    assert_eq!(assigned.body, original.body);
    assert_eq!(assigned.extension, original.extension);
}

#[test]
fn test_json_round_trip_encodes_bytes_as_base64() {
    let message = Message::new(Bytes::from_static(&[0, 159, 146, 150]))
        .with_extension("x".into())
        .assigned(MessageId::generate(1), LookupId::new(1));

    let json = serde_json::to_string(&message).unwrap();
    assert!(json.contains("AJ+Slg=="));

    let decoded: Message = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, message);
}

mod lookup_action {
    use super::*;

    fn ids(values: &[u64]) -> Vec<LookupId> {
        values.iter().copied().map(LookupId::new).collect()
    }

    #[test]
    fn test_current_requires_exact_match() {
        let visible = ids(&[1, 3, 5]);
        assert_eq!(
            LookupAction::Current.select(LookupId::new(3), &visible),
            Some(LookupId::new(3))
        );
        assert_eq!(LookupAction::Current.select(LookupId::new(4), &visible), None);
    }

    #[test]
    fn test_neighbour_actions() {
        let visible = ids(&[1, 3, 5]);
        assert_eq!(
            LookupAction::Next.select(LookupId::new(3), &visible),
            Some(LookupId::new(5))
        );
        assert_eq!(
            LookupAction::Previous.select(LookupId::new(3), &visible),
            Some(LookupId::new(1))
        );
        assert_eq!(LookupAction::Next.select(LookupId::new(5), &visible), None);
    }

    #[test]
    fn test_first_and_last_ignore_target() {
        let visible = ids(&[2, 4, 8]);
        assert_eq!(
            LookupAction::First.select(LookupId::new(100), &visible),
            Some(LookupId::new(2))
        );
        assert_eq!(
            LookupAction::Last.select(LookupId::new(0), &visible),
            Some(LookupId::new(8))
        );
        assert_eq!(LookupAction::First.select(LookupId::new(0), &[]), None);
    }
}
