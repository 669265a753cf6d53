use uuid::Uuid;

pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Appends the correlation id to a caller-visible error message.
pub fn message_with_request_id(message: &str, request_id: &str) -> String {
    format!("{message} (request id: {request_id})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotates_message() {
        assert_eq!(
            message_with_request_id("boom", "abc"),
            "boom (request id: abc)"
        );
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }
}
