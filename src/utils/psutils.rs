use itertools::Itertools;
use std::ffi::OsStr;

/// Extract the group name that follows `flag` on a process command line.
///
/// The flag has to be a whole token. A quoted value runs up to the next quote;
/// an unquoted value runs up to the next whitespace. Returns `None` when the
/// flag is missing or carries no value.
pub fn resolve_group_name(command_line: &str, flag: &str) -> Option<String> {
    if flag.is_empty() {
        return None;
    }

    let mut search_from = 0;
    while let Some(offset) = command_line[search_from..].find(flag) {
        let start = search_from + offset;
        let end = start + flag.len();
        search_from = end;

        let starts_token = command_line[..start]
            .chars()
            .next_back()
            .is_none_or(char::is_whitespace);
        let rest = &command_line[end..];
        if !starts_token || !rest.starts_with(char::is_whitespace) {
            continue;
        }

        let value = rest.trim_start();
        let name = match value.strip_prefix('"') {
            Some(quoted) => &quoted[..quoted.find('"')?],
            None if value.starts_with('-') => return None,
            None => value.split(char::is_whitespace).next().unwrap_or_default(),
        };
        return (!name.is_empty()).then(|| name.to_string());
    }
    None
}

/// Join process arguments back into a single command line, quoting arguments
/// that contain whitespace.
pub fn render_command_line<S: AsRef<OsStr>>(args: &[S]) -> String {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref().to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("\"{arg}\"")
            } else {
                arg.into_owned()
            }
        })
        .join(" ")
}

/// Compare executable names ignoring case and a trailing `.exe`.
pub fn same_executable(left: &str, right: &str) -> bool {
    fn stem(name: &str) -> String {
        let lowered = name.to_ascii_lowercase();
        lowered.strip_suffix(".exe").unwrap_or(&lowered).to_string()
    }
    stem(left) == stem(right)
}
