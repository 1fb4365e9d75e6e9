//! Status message rendering
//!
//! Produces the single code block posted to a server's output channel.

use crate::queue::timeout::TimeoutPolicy;
use crate::types::{MemberId, QueueEntry, Related};
use crate::utils::{format_hms, non_negative, split_duration};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Delimiter wrapping the rendered block
pub const BLOCK_DELIMITER: &str = "```";

/// Everything needed to render one server's queue at one instant
#[derive(Debug, Clone)]
pub struct QueueView<'a> {
    pub preamble: &'a str,
    pub active: bool,
    pub entries: &'a [QueueEntry],
    pub related: &'a HashMap<MemberId, Related>,
    pub policy: TimeoutPolicy,
    pub now: DateTime<Utc>,
}

fn nick_for<'a>(view: &'a QueueView<'_>, member_id: MemberId) -> std::borrow::Cow<'a, str> {
    match view.related.get(&member_id) {
        Some(row) => std::borrow::Cow::Borrowed(row.nick.as_str()),
        None => std::borrow::Cow::Owned(member_id.to_string()),
    }
}

/// Render the status block for a server
pub fn render(view: &QueueView<'_>) -> String {
    let mut message = String::new();
    message.push_str(BLOCK_DELIMITER);
    message.push_str(view.preamble);
    message.push_str("\n\n");

    if !view.active {
        message.push_str(BLOCK_DELIMITER);
        return message;
    }

    let mut ordered: Vec<&QueueEntry> = view.entries.iter().collect();
    ordered.sort_by(|a, b| a.join_time.cmp(&b.join_time).then(a.id.cmp(&b.id)));

    let (queued, timed_out): (Vec<&QueueEntry>, Vec<&QueueEntry>) =
        ordered.into_iter().partition(|entry| !entry.is_timed_out());

    if queued.is_empty() {
        message.push_str("Queue is currently empty.\n");
    } else {
        message.push_str("Current queue:\n\n");
        for (position, entry) in queued.iter().enumerate() {
            let waited = non_negative(view.now.signed_duration_since(entry.join_time));
            message.push_str(&format!(
                "    {:<5}{:<25} {}\n",
                format!("{})", position + 1),
                nick_for(view, entry.member_id),
                format_hms(waited)
            ));
        }
    }

    if !timed_out.is_empty() {
        message.push_str("\nUsers on queue timeout:\n\n");
        for entry in timed_out {
            let remaining = view
                .policy
                .remaining_timeout(entry, view.now)
                .unwrap_or_default();
            let (days, hours, mins, secs) = split_duration(remaining);
            message.push_str(&format!(
                "         {:<25} {}m {}s remaining\n",
                nick_for(view, entry.member_id),
                (days * 24 + hours) * 60 + mins,
                secs
            ));
        }
    }

    message.push_str(BLOCK_DELIMITER);
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 2, 0, 0).unwrap()
    }

    fn policy() -> TimeoutPolicy {
        TimeoutPolicy::new(Duration::from_secs(330), Duration::from_secs(300))
    }

    fn related(rows: &[(MemberId, &str)]) -> HashMap<MemberId, Related> {
        rows.iter()
            .map(|(id, nick)| (*id, Related::new(10, *id, *nick)))
            .collect()
    }

    #[test]
    fn test_inactive_renders_preamble_only() {
        let related = related(&[(1, "alpha")]);
        let entries = vec![QueueEntry::new(1, 10, t0())];
        let text = render(&QueueView {
            preamble: "Queue is currently closed.",
            active: false,
            entries: &entries,
            related: &related,
            policy: policy(),
            now: t0(),
        });
        assert_eq!(text, "```Queue is currently closed.\n\n```");
    }

    #[test]
    fn test_empty_active_queue() {
        let related = HashMap::new();
        let text = render(&QueueView {
            preamble: "USTZ SRE is active now. Session ends in 5h 0m",
            active: true,
            entries: &[],
            related: &related,
            policy: policy(),
            now: t0(),
        });
        assert!(text.starts_with("```USTZ SRE is active now."));
        assert!(text.contains("Queue is currently empty."));
        assert!(text.ends_with("```"));
    }

    #[test]
    fn test_lists_in_join_order_with_timeout_section() {
        let related = related(&[(1, "alpha"), (2, "bravo"), (3, "charlie")]);
        let late = QueueEntry::new(2, 10, t0() + TimeDelta::seconds(60));
        let early = QueueEntry::new(1, 10, t0());
        let mut away = QueueEntry::new(3, 10, t0() - TimeDelta::seconds(600));
        away.timeout_start = Some(t0() + TimeDelta::seconds(3_600));

        let entries = vec![late, away, early];
        let now = t0() + TimeDelta::seconds(3_700);
        let text = render(&QueueView {
            preamble: "active",
            active: true,
            entries: &entries,
            related: &related,
            policy: policy(),
            now,
        });

        let alpha = text.find("alpha").unwrap();
        let bravo = text.find("bravo").unwrap();
        let timeout_header = text.find("Users on queue timeout").unwrap();
        let charlie = text.find("charlie").unwrap();
        assert!(alpha < bravo);
        assert!(bravo < timeout_header);
        assert!(timeout_header < charlie);

        assert!(text.contains("    1)   alpha"));
        assert!(text.contains("1h 1m 40s"));
        assert!(text.contains("3m 20s remaining"));
    }
}
