//! Summary email assembly: one entry per queued notification, a header
//! naming the covered period.

use nb_common::types::DigestEntry;
use nb_common::DigestFrequency;

pub fn subject(frequency: DigestFrequency) -> String {
    match frequency {
        DigestFrequency::Hourly => "Your hourly summary".to_string(),
        DigestFrequency::Daily => "Your daily summary".to_string(),
        DigestFrequency::Weekly => "Your weekly summary".to_string(),
    }
}

pub fn body(frequency: DigestFrequency, entries: &[DigestEntry]) -> String {
    let mut out = format!("Here's what happened this {}:\n\n", frequency.as_str());
    for entry in entries {
        out.push_str(&format!("- {} ({})\n  {}\n", entry.title, entry.created_at.to_rfc3339(), entry.body));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn entry(title: &str) -> DigestEntry {
        DigestEntry {
            notification_id: "n1".to_string(),
            delivery_id: "d1".to_string(),
            kind: "transfer_completed".to_string(),
            title: title.to_string(),
            body: "body text".to_string(),
            created_at: Utc::now(),
            data: HashMap::new(),
        }
    }

    #[test]
    fn body_lists_every_entry() {
        let entries = vec![entry("First"), entry("Second")];
        let text = body(DigestFrequency::Daily, &entries);
        assert!(text.contains("First"));
        assert!(text.contains("Second"));
    }
}
