use crate::contract_service::MegapoolContracts;
use crate::state_reader::ValidatorInfo;
use alloy_primitives::{keccak256, Address, B256};
use megapool_utils::{
    MegapoolError, EXPRESS_QUEUE_NAMESPACE, QUEUE_PAGE_SIZE, STANDARD_QUEUE_NAMESPACE,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueKind {
    Standard,
    Express,
}

impl QueueKind {
    pub fn namespace(&self) -> B256 {
        match self {
            QueueKind::Standard => keccak256(STANDARD_QUEUE_NAMESPACE),
            QueueKind::Express => keccak256(EXPRESS_QUEUE_NAMESPACE),
        }
    }

    pub fn of(info: &ValidatorInfo) -> Self {
        if info.express_used {
            QueueKind::Express
        } else {
            QueueKind::Standard
        }
    }
}

/// The lane a new validator enters, given the node's express tickets.
pub fn entry_queue(express_tickets: u32, use_express: bool) -> QueueKind {
    if use_express && express_tickets > 0 {
        QueueKind::Express
    } else {
        QueueKind::Standard
    }
}

/// Only validators still waiting for assignment can leave the queue.
pub fn can_dequeue(info: &ValidatorInfo) -> bool {
    info.in_queue && !info.dissolved
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub receiver: Address,
    pub validator_id: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuePage {
    pub entries: Vec<QueueEntry>,
    /// Zero once the end of the queue is reached.
    pub next_index: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDetails {
    pub express_length: u64,
    pub standard_length: u64,
    pub queue_index: u64,
    /// Express entries served per standard entry.
    pub express_queue_rate: u64,
}

/// Overall 1-based position given the 1-based position within one lane. Entries of the
/// other lane that are served first are capped at that lane's length.
pub fn overall_position(kind: QueueKind, lane_position: u64, details: &QueueDetails) -> u64 {
    let rate = details.express_queue_rate;
    let interval = rate.saturating_add(1);
    let others_before = match kind {
        QueueKind::Express => {
            if rate == 0 {
                details.standard_length
            } else {
                let served = lane_position.saturating_add(details.queue_index % interval);
                (served / rate).min(details.standard_length)
            }
        }
        QueueKind::Standard => lane_position
            .saturating_mul(details.express_length)
            .saturating_add(rate - details.queue_index % interval)
            .min(details.express_length),
    };
    lane_position.saturating_add(others_before)
}

pub struct QueueCoordinator {
    contracts: Arc<dyn MegapoolContracts>,
}

impl QueueCoordinator {
    pub fn new(contracts: Arc<dyn MegapoolContracts>) -> Self {
        Self { contracts }
    }

    pub async fn queue_length(&self, kind: QueueKind) -> Result<u64, MegapoolError> {
        self.contracts
            .queue_length(kind)
            .await
            .map_err(MegapoolError::Transport)
    }

    pub async fn details(&self) -> Result<QueueDetails, MegapoolError> {
        let (express_length, standard_length, queue_index, express_queue_rate) = futures::try_join!(
            self.queue_length(QueueKind::Express),
            self.queue_length(QueueKind::Standard),
            async { self.contracts.queue_index().await.map_err(MegapoolError::Transport) },
            async {
                self.contracts
                    .express_queue_rate()
                    .await
                    .map_err(MegapoolError::Transport)
            },
        )?;
        Ok(QueueDetails {
            express_length,
            standard_length,
            queue_index,
            express_queue_rate,
        })
    }

    /// 0-based position of the validator within its lane, scanning page by page.
    pub async fn lane_position(
        &self,
        kind: QueueKind,
        megapool: Address,
        validator_id: u32,
    ) -> Result<Option<u64>, MegapoolError> {
        let mut start = 0;
        let mut position = 0;
        loop {
            let page = self
                .contracts
                .scan_queue(kind, start, QUEUE_PAGE_SIZE)
                .await
                .map_err(MegapoolError::Transport)?;
            for entry in &page.entries {
                if entry.receiver == megapool && entry.validator_id == validator_id {
                    return Ok(Some(position));
                }
                position += 1;
            }
            if page.next_index == 0 || page.entries.is_empty() {
                return Ok(None);
            }
            start = page.next_index;
        }
    }

    pub async fn position(
        &self,
        megapool: Address,
        info: &ValidatorInfo,
        details: &QueueDetails,
    ) -> Result<Option<u64>, MegapoolError> {
        if !info.in_queue {
            return Ok(None);
        }
        let kind = QueueKind::of(info);
        Ok(self
            .lane_position(kind, megapool, info.validator_id)
            .await?
            .map(|pos| overall_position(kind, pos + 1, details)))
    }
}
