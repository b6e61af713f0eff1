/// Expand `${VAR}` and `${VAR:-fallback}` placeholders in raw config text.
///
/// Unset variables without a fallback are left untouched so the parser can
/// report them in context.
pub fn substitute_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            // Unterminated placeholder: keep the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => match fallback {
                Some(fallback) if !name.is_empty() => out.push_str(fallback),
                _ => {
                    out.push_str("${");
                    out.push_str(body);
                    out.push('}');
                },
            },
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[allow(unsafe_code, clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serial_test::serial};

    #[test]
    #[serial]
    fn substitutes_known_var() {
        unsafe { std::env::set_var("TOLLGATE_SUBST_SECRET", "s3cr3t") };
        assert_eq!(
            substitute_env("client_secret = \"${TOLLGATE_SUBST_SECRET}\""),
            "client_secret = \"s3cr3t\""
        );
        unsafe { std::env::remove_var("TOLLGATE_SUBST_SECRET") };
    }

    #[test]
    #[serial]
    fn uses_fallback_when_unset() {
        unsafe { std::env::remove_var("TOLLGATE_SUBST_MODE") };
        assert_eq!(substitute_env("mode=${TOLLGATE_SUBST_MODE:-TVM2}"), "mode=TVM2");
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_env("${TOLLGATE_NONEXISTENT_XYZ}"),
            "${TOLLGATE_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn keeps_unterminated_placeholder() {
        assert_eq!(substitute_env("a ${B c"), "a ${B c");
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
