use ammonia;

/// Sanitizes user-submitted markup (revision text, explanations, issue
/// bodies) with a whitelist strategy: safe formatting tags survive,
/// scripts and event-handler attributes are stripped. Fail-safe against
/// stored XSS regardless of which client renders the content.
pub fn sanitize_markup(input: &str) -> String {
    ammonia::clean(input)
}
