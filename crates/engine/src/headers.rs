//! Header resolution from a chain's commit history.

use crate::{ChainInstance, HeaderError, HeaderSource, InvalidHeightError};
use async_trait::async_trait;
use polychain_types::BlockHeader;

/// [`HeaderSource`] backed by the headers each chain records on commit.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitHistoryHeaders;

impl CommitHistoryHeaders {
    /// Validate `height` against `chain` and resolve "latest" (0) to the tip.
    pub fn resolve_height(chain: &ChainInstance, height: i64) -> Result<u64, InvalidHeightError> {
        if height < 0 {
            return Err(InvalidHeightError::Negative { height });
        }
        let tip = chain.tip().0;
        if tip == 0 {
            return Err(InvalidHeightError::NotReady {
                chain_id: chain.id().clone(),
            });
        }
        let height = height as u64;
        if height > tip {
            return Err(InvalidHeightError::Future {
                height: height as i64,
                tip,
            });
        }
        Ok(if height == 0 { tip } else { height })
    }
}

#[async_trait]
impl HeaderSource for CommitHistoryHeaders {
    async fn header_by_height(
        &self,
        chain: &ChainInstance,
        height: i64,
    ) -> Result<BlockHeader, HeaderError> {
        let height = Self::resolve_height(chain, height)?;
        chain.store().header(height).ok_or_else(|| HeaderError::Missing {
            chain_id: chain.id().clone(),
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_ready_before_first_commit() {
        let chain = ChainInstance::new("a");
        let err = CommitHistoryHeaders.header_by_height(&chain, 0).await.unwrap_err();
        assert!(matches!(
            err,
            HeaderError::InvalidHeight(InvalidHeightError::NotReady { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolves_latest_and_rejects_future() {
        let chain = ChainInstance::new("a");
        let first = chain.store().commit_block([], 1_000);
        let second = chain.store().commit_block([], 2_000);

        assert_eq!(CommitHistoryHeaders.header_by_height(&chain, 0).await.unwrap(), second);
        assert_eq!(CommitHistoryHeaders.header_by_height(&chain, 1).await.unwrap(), first);
        assert!(matches!(
            CommitHistoryHeaders.header_by_height(&chain, 3).await,
            Err(HeaderError::InvalidHeight(InvalidHeightError::Future { height: 3, tip: 2 }))
        ));
        assert!(matches!(
            CommitHistoryHeaders.header_by_height(&chain, -5).await,
            Err(HeaderError::InvalidHeight(InvalidHeightError::Negative { height: -5 }))
        ));
    }
}
