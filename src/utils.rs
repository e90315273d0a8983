/// Turn an expression into a filesystem-safe analysis label.
///
/// Operators become words, spaces become underscores, wildcards and
/// parentheses are dropped, and runs of underscores collapse.
pub fn sanitize_label(expression: &str) -> String {
    let mut label = String::with_capacity(expression.len());
    for ch in expression.trim().chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' => label.push(ch),
            ' ' | '(' | ')' => label.push('_'),
            '&' => label.push_str("_and_"),
            '|' => label.push_str("_or_"),
            '~' => label.push_str("_not_"),
            _ => {}
        }
    }
    let mut collapsed = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(ch);
    }
    collapsed.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_plain_term() {
        assert_eq!(sanitize_label("emotion"), "emotion");
        assert_eq!(sanitize_label("emotional faces"), "emotional_faces");
    }

    #[test]
    fn test_sanitize_operators() {
        assert_eq!(sanitize_label("emotion & pain"), "emotion_and_pain");
        assert_eq!(
            sanitize_label("emotion* &~ (emotional faces | pain)"),
            "emotion_and_not_emotional_faces_or_pain"
        );
    }
}
