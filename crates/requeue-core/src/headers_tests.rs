//! Tests for header bookkeeping.

use super::*;

fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    pairs.iter().copied().collect()
}

mod retry_count {
    use super::*;

    #[test]
    fn test_absent_count_starts_at_one() {
        let mut map = headers(&[(FAILED_QUEUE, "orders")]);

        assert_eq!(increment_retry_count(&mut map), "1");
        assert_eq!(map.get(RETRY_COUNT), Some("1"));
    }

    #[test]
    fn test_integer_count_is_incremented() {
        let cases = [("1", "2"), ("41", "42"), (" 7 ", "8"), ("+3", "4"), ("-1", "0")];

        for (current, expected) in cases {
            let mut map = headers(&[(RETRY_COUNT, current)]);
            assert_eq!(increment_retry_count(&mut map), expected, "from {:?}", current);
            assert_eq!(map.get(RETRY_COUNT), Some(expected));
        }
    }

    /// Verify that unusable values are left untouched instead of failing.
    #[test]
    fn test_unparseable_count_is_unchanged() {
        let overflow = i32::MAX.to_string();
        let cases = ["", "abc", "1.5", "99999999999", overflow.as_str()];

        for current in cases {
            let mut map = headers(&[(RETRY_COUNT, current)]);
            assert_eq!(increment_retry_count(&mut map), current);
            assert_eq!(map.get(RETRY_COUNT), Some(current));
        }
    }

    #[test]
    fn test_count_keeps_header_position() {
        let mut map = headers(&[(RETRY_COUNT, "1"), (FAILED_QUEUE, "orders")]);
        increment_retry_count(&mut map);

        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![RETRY_COUNT, FAILED_QUEUE]);
    }
}

mod scan_ids {
    use super::*;

    #[test]
    fn test_original_id_takes_precedence() {
        let map = headers(&[(MESSAGE_ID, "plain"), (ORIGINAL_ID, "original")]);
        assert_eq!(original_id(&map), Some("original"));
    }

    #[test]
    fn test_message_id_is_fallback() {
        let map = headers(&[(MESSAGE_ID, "plain")]);
        assert_eq!(original_id(&map), Some("plain"));
    }

    #[test]
    fn test_empty_ids_never_match() {
        assert_eq!(original_id(&headers(&[(MESSAGE_ID, "")])), None);
        assert_eq!(original_id(&headers(&[(ORIGINAL_ID, ""), (MESSAGE_ID, "plain")])), None);
        assert_eq!(original_id(&HeaderMap::new()), None);
    }
}
