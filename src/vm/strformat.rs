//! `{N}` string templates used by `print()`, `format()` and `upload()`.

/// Render a number the way scripts print it: shortest round-trip form,
/// integers without a fractional part.
pub(crate) fn number_to_string(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if v == 0.0 {
        "0".into()
    } else {
        v.to_string()
    }
}

/// Substitute `{N}` with argument `N`. `{{` is a literal brace; anything
/// else, including placeholders past the last argument, is copied through.
pub(crate) fn strformat(fmt: &[u8], args: &[f64]) -> Vec<u8> {
    let mut out = String::with_capacity(fmt.len());
    let fmt = String::from_utf8_lossy(fmt);
    let mut rest = fmt.as_ref();
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        if let Some(after) = tail.strip_prefix('{') {
            out.push('{');
            rest = after;
            continue;
        }
        let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
        let arg = (digits > 0 && tail[digits..].starts_with('}'))
            .then(|| tail[..digits].parse::<usize>().ok())
            .flatten()
            .and_then(|i| args.get(i));
        match arg {
            Some(&v) => {
                out.push_str(&number_to_string(v));
                rest = &tail[digits + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out.into_bytes()
}
