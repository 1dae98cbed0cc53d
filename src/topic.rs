//! Topic name and filter handling.
//!
//! A topic *name* is a publication target and carries no wildcards. A topic
//! *filter* is a subscription pattern where `+` matches one level and `#`
//! matches the remaining levels (and must be the last level). Levels are
//! separated by `/`.

/// Check a publication topic name: non-empty and wildcard-free.
pub fn valid_name(topic: &str) -> bool {
    !topic.is_empty() && !topic.contains('+') && !topic.contains('#')
}

/// Check a subscription filter against the structural wildcard rules:
/// `#` only as the entire last level, `+` only as an entire level.
pub fn valid_filter(filter: &str) -> bool {
    if filter.is_empty() {
        return false;
    }
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (idx, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || idx != last) {
            return false;
        }
        if level.contains('+') && *level != "+" {
            return false;
        }
    }
    true
}

/// Check if a topic filter matches a topic name.
///
/// Filters starting with a wildcard never match `$`-prefixed topics
/// (`$SYS/...` and friends are reserved for the broker).
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    let mut fi = 0;
    let mut ti = 0;

    while fi < filter_parts.len() {
        let fp = filter_parts[fi];

        if fp == "#" {
            return true;
        }

        if ti >= topic_parts.len() {
            return false;
        }

        if fp == "+" {
            fi += 1;
            ti += 1;
            continue;
        }

        if fp != topic_parts[ti] {
            return false;
        }

        fi += 1;
        ti += 1;
    }

    fi == filter_parts.len() && ti == topic_parts.len()
}
