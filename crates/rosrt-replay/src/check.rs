// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Check mode: inspect a single bag without creating a node or publishing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::bag::{BagError, BagReader};

/// Per-topic aggregate from a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSummary {
    pub type_name: String,
    pub md5sum: String,
    pub count: u64,
}

/// Scan result for one bag.
#[derive(Debug, Clone)]
pub struct BagSummary {
    pub path: PathBuf,
    pub start_time_ns: u64,
    pub end_time_ns: u64,
    pub length_ns: u64,
    pub topics: BTreeMap<String, TopicSummary>,
}

/// Scan `path` and aggregate per-topic type, digest, and count.
pub fn check_bag<P: AsRef<Path>>(path: P) -> Result<BagSummary, BagError> {
    let mut reader = BagReader::open(path.as_ref())?;
    let mut topics: BTreeMap<String, TopicSummary> = BTreeMap::new();
    let mut end_time_ns = reader.first_record_time_ns();

    while let Some(envelope) = reader.next()? {
        end_time_ns = envelope.record_time_ns;
        topics
            .entry(envelope.topic)
            .and_modify(|summary| summary.count += 1)
            .or_insert(TopicSummary {
                type_name: envelope.type_name,
                md5sum: envelope.md5sum,
                count: 1,
            });
    }

    let start_time_ns = reader.first_record_time_ns();
    Ok(BagSummary {
        path: path.as_ref().to_path_buf(),
        start_time_ns,
        end_time_ns,
        length_ns: end_time_ns.saturating_sub(start_time_ns),
        topics,
    })
}

impl std::fmt::Display for BagSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "bag: {}", self.path.display())?;
        writeln!(f, "start_time: {}", self.start_time_ns)?;
        writeln!(f, "end_time: {}", self.end_time_ns)?;
        writeln!(f, "length: {}", self.length_ns)?;
        writeln!(f, "topics:")?;
        for (name, summary) in &self.topics {
            writeln!(f, "  - name: {}", name)?;
            writeln!(f, "    datatype: {}", summary.type_name)?;
            writeln!(f, "    md5sum: {}", summary.md5sum)?;
            writeln!(f, "    count: {}", summary.count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::{BagWriter, Envelope};
    use tempfile::tempdir;

    #[test]
    fn summarizes_topics_and_bounds() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("check.bag");
        let mut writer = BagWriter::create(&path).expect("create");
        for i in 0..6u64 {
            let topic = if i % 2 == 0 { "/even" } else { "/odd" };
            writer
                .write(&Envelope {
                    record_time_ns: 1_000 + i * 500,
                    topic: topic.to_string(),
                    type_name: "rosrt_msgs/Text".to_string(),
                    md5sum: "feed".to_string(),
                    payload: vec![],
                })
                .expect("write");
        }
        writer.finalize().expect("finalize");

        let summary = check_bag(&path).expect("check");
        assert_eq!(summary.start_time_ns, 1_000);
        assert_eq!(summary.end_time_ns, 3_500);
        assert_eq!(summary.length_ns, 2_500);
        assert_eq!(summary.topics.len(), 2);
        assert_eq!(summary.topics["/even"].count, 3);
        assert_eq!(summary.topics["/odd"].count, 3);
        assert_eq!(summary.topics["/even"].type_name, "rosrt_msgs/Text");

        let rendered = summary.to_string();
        assert!(rendered.contains("bag: "));
        assert!(rendered.contains("  - name: /even"));
        assert!(rendered.contains("    count: 3"));
    }
}
