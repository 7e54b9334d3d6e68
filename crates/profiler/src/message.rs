//! Wire format of the profiling collector.
//!
//! Messages arrive as URL-encoded `data` query parameters. Fields are
//! `;`-separated, parent partition lists `,`-separated, and parent entries
//! `#`-separated.

use serde::Deserialize;

use crate::error::ProfilingError;

/// A parent operator reference with the partitions feeding this record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub lineage: String,
    pub partitions: Vec<i32>,
}

/// One per-stage timing report: `lineage;partition;parents;timeMillis`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeMsg {
    pub lineage: String,
    pub partition: i32,
    pub parents: Vec<ParentRef>,
    pub time_ms: u64,
}

/// Messages handed from the HTTP handlers to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorMessage {
    Time(TimeMsg),
    Sizes(Vec<(String, u64)>),
}

/// Decode a `/times` payload.
pub fn parse_times(payload: &str) -> Result<TimeMsg, ProfilingError> {
    let parts: Vec<&str> = payload.split(';').collect();
    let [lineage, partition, parents, time] = parts.as_slice() else {
        return Err(ProfilingError::MalformedMessage(payload.to_string()));
    };
    let partition: i32 = partition
        .parse()
        .map_err(|_| ProfilingError::MalformedMessage(payload.to_string()))?;
    let time_ms: u64 = time
        .parse()
        .map_err(|_| ProfilingError::MalformedMessage(payload.to_string()))?;

    let mut parent_refs = Vec::new();
    for entry in parents.split('#').filter(|e| !e.is_empty()) {
        let mut fields = entry.split(',');
        let lineage = fields
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| ProfilingError::MalformedMessage(payload.to_string()))?
            .to_string();
        let partitions = fields
            .map(|p| {
                p.parse()
                    .map_err(|_| ProfilingError::MalformedMessage(payload.to_string()))
            })
            .collect::<Result<Vec<i32>, _>>()?;
        parent_refs.push(ParentRef {
            lineage,
            partitions,
        });
    }

    Ok(TimeMsg {
        lineage: lineage.to_string(),
        partition,
        parents: parent_refs,
        time_ms,
    })
}

/// Decode a `/sizes` payload: `lineage:bytes;lineage:bytes;…`.
pub fn parse_sizes(payload: &str) -> Result<Vec<(String, u64)>, ProfilingError> {
    payload
        .split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (lineage, bytes) = entry
                .split_once(':')
                .ok_or_else(|| ProfilingError::MalformedMessage(payload.to_string()))?;
            let bytes: u64 = bytes
                .parse()
                .map_err(|_| ProfilingError::MalformedMessage(payload.to_string()))?;
            Ok((lineage.to_string(), bytes))
        })
        .collect()
}

/// Query parameters of both collector routes.
#[derive(Debug, Deserialize)]
pub struct DataParam {
    pub data: String,
}
