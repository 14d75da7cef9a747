//! Genesis bootstrap and cross-node genesis reconciliation
//!
//! A chain with no local blocks either synthesizes its genesis (root
//! nodes on layer 1) or adopts the peer-confirmed one. A chain with a
//! local genesis compares it against the validator majority; on
//! disagreement the older creation time wins and the loser re-seeds.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use tokio_util::sync::CancellationToken;

use crate::constants::GENESIS_KIND;
use crate::integrity::{ChainStatus, IntegrityChecker, IntegrityError};
use crate::net::backoff_delay;
use crate::queue::AssemblyQueue;
use crate::record::{BlockRecord, TIME_FORMAT};

impl IntegrityChecker {
    /// Full startup sequence: reconcile genesis, repair until valid,
    /// bootstrapping a missing genesis along the way
    ///
    /// `genesis_params` is the economic-parameter payload a root node
    /// seeds its genesis from; other roles ignore it.
    pub async fn ensure_chain(
        &self,
        queue: &AssemblyQueue,
        genesis_params: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<BlockRecord, IntegrityError> {
        self.reconcile_genesis(cancel).await?;
        loop {
            match self.run(cancel).await? {
                ChainStatus::Valid(last) => return Ok(*last),
                ChainStatus::GenesisNeed => {
                    self.bootstrap_genesis(queue, genesis_params, cancel).await?;
                }
                ChainStatus::CheckAgain => unreachable!("run() settles CheckAgain"),
            }
        }
    }

    /// Create or adopt the first two blocks of an empty chain
    pub async fn bootstrap_genesis(
        &self,
        queue: &AssemblyQueue,
        genesis_params: Option<&serde_json::Value>,
        cancel: &CancellationToken,
    ) -> Result<(), IntegrityError> {
        if self.config.layer == 1 && self.config.is_root() {
            let params = genesis_params
                .ok_or_else(|| IntegrityError::Bootstrap("root node has no genesis parameters".into()))?;
            tracing::info!("synthesizing root genesis");
            let genesis = self.build_block(queue, GENESIS_KIND, params.to_string(), None).await?;

            // derive the required follow-up block acknowledging genesis
            let ack = serde_json::json!({ "genesisAck": genesis.header.uid }).to_string();
            self.build_block(queue, 100, ack, Some(&genesis)).await?;
            return Ok(());
        }

        tracing::info!("fetching peer-confirmed genesis");
        for row in [1i64, 2] {
            let record = self.fetcher.fetch_row(row, cancel).await?;
            if record.header.row_no != row || !self.engine.verify(&record) {
                return Err(IntegrityError::PeerBlockInvalid);
            }
            self.store
                .write(&record)
                .await
                .map_err(|e| IntegrityError::Bootstrap(e.to_string()))?;
        }
        Ok(())
    }

    /// Compare the local genesis against the validator majority
    ///
    /// Returns true when the local chain lost and was re-seeded.
    pub async fn reconcile_genesis(&self, cancel: &CancellationToken) -> Result<bool, IntegrityError> {
        if self.config.standalone {
            return Ok(false);
        }
        let local = match self.store.read(crate::constants::GENESIS_UID) {
            Ok(Some(local)) => local,
            Ok(None) => return Ok(false),
            Err(e) => {
                tracing::warn!(error = %e, "local genesis unreadable, leaving to integrity repair");
                return Ok(false);
            }
        };

        // one poll per known validator; unreachable peers just do not vote
        let mut tally: HashMap<String, (u32, String, BlockRecord)> = HashMap::new();
        for peer in self.fetcher.peers() {
            match self.fetcher.fetch_row_once(peer, 1).await {
                Ok(record) => {
                    let entry = tally
                        .entry(record.sign.clone())
                        .or_insert_with(|| (0, peer.clone(), record));
                    entry.0 += 1;
                }
                Err(e) => tracing::warn!(peer = %peer, error = %e, "genesis poll failed"),
            }
        }
        // ties between equally voted signatures fall to the older one
        let Some((_, (votes, winner_peer, winner))) = tally
            .into_iter()
            .max_by_key(|(_, (votes, _, record))| (*votes, std::cmp::Reverse(record.header.time.clone())))
        else {
            return Ok(false);
        };
        if winner.sign == local.sign {
            return Ok(false);
        }
        tracing::warn!(votes, "genesis disagreement with validator majority");

        // never adopt anything that fails the commitment check
        if !winner.is_genesis() || !self.engine.verify(&winner) {
            tracing::warn!(peer = %winner_peer, "majority genesis fails verification, keeping local chain");
            return Ok(false);
        }

        // older creation time wins
        let local_time = parse_block_time(&local);
        let winner_time = parse_block_time(&winner);
        match (local_time, winner_time) {
            (Some(ours), Some(theirs)) if ours <= theirs => {
                tracing::info!("local genesis is older, keeping it");
                return Ok(false);
            }
            (Some(_), Some(_)) => {}
            _ => {
                tracing::warn!("undecodable genesis timestamps, keeping local chain");
                return Ok(false);
            }
        }

        // the winner's second row must be in hand and linked before
        // anything local is deleted
        let second = self.fetch_row_from_peer(&winner_peer, 2, cancel).await?;
        if second.prev != winner.prev_link() {
            tracing::warn!(peer = %winner_peer, "second block does not link to the majority genesis, keeping local chain");
            return Ok(false);
        }

        tracing::warn!("majority genesis is older, wiping local chain and re-seeding");
        match self.store.archives() {
            Ok(archives) => {
                for path in archives {
                    if let Err(e) = self.store.delete_archive(&path) {
                        tracing::error!(archive = %path.display(), error = %e, "wipe failed");
                    }
                }
            }
            Err(e) => return Err(IntegrityError::Bootstrap(e.to_string())),
        }

        self.store
            .write(&winner)
            .await
            .map_err(|e| IntegrityError::Bootstrap(e.to_string()))?;
        self.store
            .write(&second)
            .await
            .map_err(|e| IntegrityError::Bootstrap(e.to_string()))?;
        Ok(true)
    }

    /// Build, seal, and persist one block through the queue
    async fn build_block(
        &self,
        queue: &AssemblyQueue,
        kind: u16,
        payload: String,
        last: Option<&BlockRecord>,
    ) -> Result<BlockRecord, IntegrityError> {
        queue
            .add(kind, payload)
            .map_err(|e| IntegrityError::Bootstrap(e.to_string()))?;
        let candidate = queue
            .get(last)
            .map_err(|e| IntegrityError::Bootstrap(e.to_string()))?
            .ok_or_else(|| IntegrityError::Bootstrap("queue produced no candidate".into()))?;
        let mut record = candidate.record;
        self.engine
            .make(&mut record, &self.config.wallet_key)
            .map_err(|e| IntegrityError::Bootstrap(e.to_string()))?;
        self.store
            .write(&record)
            .await
            .map_err(|e| IntegrityError::Bootstrap(e.to_string()))?;
        queue
            .add_to_chain(&candidate.dedup_keys)
            .map_err(|e| IntegrityError::Bootstrap(e.to_string()))?;
        Ok(record)
    }

    /// Retry one specific peer until it yields the row or we cancel
    async fn fetch_row_from_peer(
        &self,
        peer: &str,
        row: i64,
        cancel: &CancellationToken,
    ) -> Result<BlockRecord, IntegrityError> {
        let mut failures: u32 = 0;
        loop {
            match self.fetcher.fetch_row_once(peer, row).await {
                Ok(record) if record.header.row_no == row && self.engine.verify(&record) => {
                    return Ok(record);
                }
                Ok(_) => return Err(IntegrityError::PeerBlockInvalid),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(peer = %peer, row, failures, error = %e, "re-seed fetch failed");
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(IntegrityError::Cancelled),
                _ = tokio::time::sleep(backoff_delay(failures)) => {}
            }
        }
    }
}

fn parse_block_time(record: &BlockRecord) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&record.header.time, TIME_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeRole;
    use crate::constants::GENESIS_UID;
    use crate::integrity::checker::tests::{fixture, seed_chain};
    use crate::net::{NetError, PeerFetcher, PeerTransport};
    use async_trait::async_trait;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_root_bootstrap_builds_first_two_rows() {
        let fix = fixture(NodeRole::Root, HashMap::new());
        let cancel = CancellationToken::new();
        let params = serde_json::json!({"supply": 5000, "decimals": 8});

        fix.checker
            .bootstrap_genesis(&fix.queue, Some(&params), &cancel)
            .await
            .unwrap();

        let last = fix
            .checker
            .ensure_chain(&fix.queue, Some(&params), &cancel)
            .await
            .unwrap();
        assert_eq!(last.header.row_no, 2);
        assert_eq!(fix.checker.genesis.get().unwrap()["supply"], 5000);
        assert!(fix.checker.store.read(GENESIS_UID).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_root_bootstrap_without_params_fails() {
        let fix = fixture(NodeRole::Root, HashMap::new());
        let cancel = CancellationToken::new();
        assert!(matches!(
            fix.checker.bootstrap_genesis(&fix.queue, None, &cancel).await,
            Err(IntegrityError::Bootstrap(_))
        ));
    }

    #[tokio::test]
    async fn test_validator_bootstrap_adopts_peer_rows() {
        // build a chain on a root fixture, then serve it to a validator
        let root = fixture(NodeRole::Root, HashMap::new());
        let chain = seed_chain(&root, 1).await;
        let peer_rows: HashMap<i64, BlockRecord> =
            chain.iter().map(|r| (r.header.row_no, r.clone())).collect();

        let validator = fixture(NodeRole::Validator, peer_rows);
        let cancel = CancellationToken::new();
        validator
            .checker
            .bootstrap_genesis(&validator.queue, None, &cancel)
            .await
            .unwrap();
        assert_eq!(
            validator.checker.store.read(GENESIS_UID).unwrap().unwrap(),
            chain[0]
        );
        assert_eq!(
            validator.checker.store.read(&chain[1].header.uid).unwrap().unwrap(),
            chain[1]
        );
    }

    #[tokio::test]
    async fn test_reconcile_standalone_is_noop() {
        let mut fix = fixture(NodeRole::Root, HashMap::new());
        fix.checker.config.standalone = true;
        seed_chain(&fix, 0).await;
        let cancel = CancellationToken::new();
        assert!(!fix.checker.reconcile_genesis(&cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_agreeing_majority_keeps_chain() {
        let fix = fixture(NodeRole::Root, HashMap::new());
        let chain = seed_chain(&fix, 0).await;

        // peers report exactly our genesis
        let peer_rows: HashMap<i64, BlockRecord> = HashMap::from([(1, chain[0].clone())]);
        let checker = IntegrityChecker::new(
            Arc::clone(&fix.checker.store),
            fix.checker.engine.clone(),
            fix.checker.config.clone(),
            Arc::clone(&fix.checker.index),
            Arc::clone(&fix.checker.genesis),
            PeerFetcher::new(
                Arc::new(crate::integrity::checker::tests::MapTransport(peer_rows)),
                vec!["http://peer".to_string()],
            ),
        );
        let cancel = CancellationToken::new();
        assert!(!checker.reconcile_genesis(&cancel).await.unwrap());
    }

    /// Transport reporting a fixed genesis from every peer
    struct VotingTransport {
        rows: HashMap<i64, BlockRecord>,
    }

    #[async_trait]
    impl PeerTransport for VotingTransport {
        async fn get_json(&self, _peer: &str, path: &str) -> Result<serde_json::Value, NetError> {
            let row: i64 = path
                .trim_start_matches("/block/")
                .trim_end_matches("/raw")
                .parse()
                .map_err(|_| NetError::Status(404))?;
            self.rows
                .get(&row)
                .map(|r| serde_json::to_value(r).unwrap())
                .ok_or(NetError::Status(404))
        }

        async fn post_json(
            &self,
            _peer: &str,
            _path: &str,
            _body: &serde_json::Value,
        ) -> Result<serde_json::Value, NetError> {
            Err(NetError::Status(404))
        }
    }

    #[tokio::test]
    async fn test_reconcile_older_majority_wins() {
        // local genesis carries the standard pinned timestamp
        let fix = fixture(NodeRole::Root, HashMap::new());
        let local_chain = seed_chain(&fix, 1).await;

        // a disagreeing genesis predating the local one
        let older_chain = variant_chain("2019-01-01 00:00:00.000000").await;

        let peer_rows: HashMap<i64, BlockRecord> = older_chain
            .iter()
            .map(|r| (r.header.row_no, r.clone()))
            .collect();
        let checker = IntegrityChecker::new(
            Arc::clone(&fix.checker.store),
            fix.checker.engine.clone(),
            fix.checker.config.clone(),
            Arc::clone(&fix.checker.index),
            Arc::clone(&fix.checker.genesis),
            PeerFetcher::new(
                Arc::new(VotingTransport { rows: peer_rows }),
                vec![
                    "http://peer-a".to_string(),
                    "http://peer-b".to_string(),
                    "http://peer-c".to_string(),
                ],
            ),
        );

        let cancel = CancellationToken::new();
        assert!(checker.reconcile_genesis(&cancel).await.unwrap());
        // re-seeded from the winner's first two blocks
        assert_eq!(checker.store.read(GENESIS_UID).unwrap().unwrap().sign, older_chain[0].sign);
        assert!(checker.store.read(&local_chain[1].header.uid).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_forged_majority_genesis_rejected_without_wipe() {
        let fix = fixture(NodeRole::Root, HashMap::new());
        let local_chain = seed_chain(&fix, 1).await;

        // a disagreeing genesis with an older claimed time but a
        // fabricated signature
        let mut forged = local_chain[0].clone();
        forged.header.time = "2010-01-01 00:00:00.000000".to_string();
        forged.sign = "totally-forged-signature".to_string();

        let peer_rows = HashMap::from([(1i64, forged)]);
        let checker = IntegrityChecker::new(
            Arc::clone(&fix.checker.store),
            fix.checker.engine.clone(),
            fix.checker.config.clone(),
            Arc::clone(&fix.checker.index),
            Arc::clone(&fix.checker.genesis),
            PeerFetcher::new(
                Arc::new(VotingTransport { rows: peer_rows }),
                vec!["http://peer".to_string()],
            ),
        );

        let cancel = CancellationToken::new();
        assert!(!checker.reconcile_genesis(&cancel).await.unwrap());
        // local rows are untouched
        assert_eq!(
            checker.store.read(GENESIS_UID).unwrap().unwrap(),
            local_chain[0]
        );
        assert_eq!(
            checker.store.read(&local_chain[1].header.uid).unwrap().unwrap(),
            local_chain[1]
        );
    }

    /// Transport answering row 1 per peer, row 2 from the winning chain
    struct PerPeerTransport {
        row1: HashMap<String, BlockRecord>,
        row2: BlockRecord,
    }

    #[async_trait]
    impl PeerTransport for PerPeerTransport {
        async fn get_json(&self, peer: &str, path: &str) -> Result<serde_json::Value, NetError> {
            let row: i64 = path
                .trim_start_matches("/block/")
                .trim_end_matches("/raw")
                .parse()
                .map_err(|_| NetError::Status(404))?;
            match row {
                1 => self
                    .row1
                    .get(peer)
                    .map(|r| serde_json::to_value(r).unwrap())
                    .ok_or(NetError::Status(404)),
                2 => Ok(serde_json::to_value(&self.row2).unwrap()),
                _ => Err(NetError::Status(404)),
            }
        }

        async fn post_json(
            &self,
            _peer: &str,
            _path: &str,
            _body: &serde_json::Value,
        ) -> Result<serde_json::Value, NetError> {
            Err(NetError::Status(404))
        }
    }

    /// A two-row chain whose genesis is re-sealed with the given time
    async fn variant_chain(time: &str) -> Vec<BlockRecord> {
        let node = fixture(NodeRole::Root, HashMap::new());
        let mut chain = seed_chain(&node, 1).await;
        chain[0].header.time = time.to_string();
        node.checker.engine.make(&mut chain[0], "wallet").unwrap();
        let (prev, prev_list) = crate::queue::organize_block_order(&chain[0]);
        chain[1].prev = prev;
        chain[1].header.prev_list = prev_list;
        node.checker.engine.make(&mut chain[1], "wallet").unwrap();
        chain
    }

    #[tokio::test]
    async fn test_majority_signature_adopted() {
        let fix = fixture(NodeRole::Root, HashMap::new());
        seed_chain(&fix, 1).await;

        // three disagreeing genesis variants with votes 5, 3, 1; the
        // singleton is the oldest, but votes decide first
        let a = variant_chain("2018-01-01 00:00:00.000000").await;
        let b = variant_chain("2017-01-01 00:00:00.000000").await;
        let c = variant_chain("2016-01-01 00:00:00.000000").await;

        let mut row1 = HashMap::new();
        let mut peers = Vec::new();
        for (count, prefix, chain) in [(5, "a", &a), (3, "b", &b), (1, "c", &c)] {
            for i in 0..count {
                let peer = format!("http://{prefix}{i}");
                row1.insert(peer.clone(), chain[0].clone());
                peers.push(peer);
            }
        }
        let checker = IntegrityChecker::new(
            Arc::clone(&fix.checker.store),
            fix.checker.engine.clone(),
            fix.checker.config.clone(),
            Arc::clone(&fix.checker.index),
            Arc::clone(&fix.checker.genesis),
            PeerFetcher::new(
                Arc::new(PerPeerTransport { row1, row2: a[1].clone() }),
                peers,
            ),
        );

        let cancel = CancellationToken::new();
        assert!(checker.reconcile_genesis(&cancel).await.unwrap());
        assert_eq!(
            checker.store.read(GENESIS_UID).unwrap().unwrap().sign,
            a[0].sign
        );
    }

    #[tokio::test]
    async fn test_unlinked_second_block_keeps_local_chain() {
        let fix = fixture(NodeRole::Root, HashMap::new());
        let local_chain = seed_chain(&fix, 1).await;

        // the winning genesis is older and well-sealed, but the second
        // block on offer belongs to a different chain
        let a = variant_chain("2018-01-01 00:00:00.000000").await;
        let b = variant_chain("2017-01-01 00:00:00.000000").await;

        let row1 = HashMap::from([("http://peer".to_string(), a[0].clone())]);
        let checker = IntegrityChecker::new(
            Arc::clone(&fix.checker.store),
            fix.checker.engine.clone(),
            fix.checker.config.clone(),
            Arc::clone(&fix.checker.index),
            Arc::clone(&fix.checker.genesis),
            PeerFetcher::new(
                Arc::new(PerPeerTransport { row1, row2: b[1].clone() }),
                vec!["http://peer".to_string()],
            ),
        );

        let cancel = CancellationToken::new();
        assert!(!checker.reconcile_genesis(&cancel).await.unwrap());
        assert_eq!(
            checker.store.read(GENESIS_UID).unwrap().unwrap(),
            local_chain[0]
        );
    }

    #[tokio::test]
    async fn test_reconcile_keeps_older_local_genesis() {
        let fix = fixture(NodeRole::Root, HashMap::new());
        let mut chain = seed_chain(&fix, 0).await;

        // age the local genesis below the pinned peer timestamp
        chain[0].header.time = "2019-06-01 00:00:00.000000".to_string();
        fix.checker.engine.make(&mut chain[0], "wallet").unwrap();
        fix.checker.store.write(&chain[0]).await.unwrap();

        // peers report a younger, different genesis
        let younger_chain = variant_chain("2021-01-01 00:00:00.000000").await;
        let peer_rows = HashMap::from([(1i64, younger_chain[0].clone())]);
        let checker = IntegrityChecker::new(
            Arc::clone(&fix.checker.store),
            fix.checker.engine.clone(),
            fix.checker.config.clone(),
            Arc::clone(&fix.checker.index),
            Arc::clone(&fix.checker.genesis),
            PeerFetcher::new(
                Arc::new(VotingTransport { rows: peer_rows }),
                vec!["http://peer".to_string()],
            ),
        );
        let cancel = CancellationToken::new();
        assert!(!checker.reconcile_genesis(&cancel).await.unwrap());
        assert_eq!(checker.store.read(GENESIS_UID).unwrap().unwrap().sign, chain[0].sign);
    }
}
