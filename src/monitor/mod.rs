//! Deposit reconciliation
//!
//! Periodically scans every custodial address for inbound transfers and
//! records them in the transaction ledger. Idempotency rests on signature
//! uniqueness: re-observing a transfer is a Duplicate insert and a no-op.
//! The per-address cursor only advances past items that were actually
//! processed, so a mid-scan failure resumes instead of skipping deposits.
//!
//! With a confirmation threshold of one, a deposit is Confirmed the moment
//! it is observed (it came from a confirmed signature listing). Deeper
//! thresholds leave the record Pending; a maturity pass compares its slot
//! against the chain tip and confirms it once enough slots have built on
//! top.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::ledger::{
    InsertOutcome, OnchainTxRecord, TxLedger, TxPurpose, TxStatus, WalletRecord, WalletStore,
};
use crate::network::{InboundTransfer, NetworkClient};

/// Totals from one reconciliation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub addresses_scanned: usize,
    pub deposits_recorded: usize,
    pub duplicates_skipped: usize,
    /// Pending deposits that reached the confirmation threshold this pass
    pub deposits_confirmed: usize,
}

pub struct DepositMonitor {
    network: Arc<dyn NetworkClient>,
    wallets: Arc<dyn WalletStore>,
    ledger: Arc<dyn TxLedger>,
    config: MonitorConfig,
    /// Last fully processed signature per address
    cursors: DashMap<String, String>,
}

impl DepositMonitor {
    pub fn new(
        network: Arc<dyn NetworkClient>,
        wallets: Arc<dyn WalletStore>,
        ledger: Arc<dyn TxLedger>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            network,
            wallets,
            ledger,
            config,
            cursors: DashMap::new(),
        }
    }

    /// Scan one custodial wallet and return the deposits recorded by this
    /// call. Already-known signatures are skipped, so a rescan of the same
    /// history returns an empty set.
    pub async fn monitor_deposits(&self, wallet: &WalletRecord) -> Result<Vec<OnchainTxRecord>> {
        let (new_deposits, _) = self.scan_address(&wallet.user_id, &wallet.public_address).await?;
        Ok(new_deposits)
    }

    /// One reconciliation pass across all custodial wallets, plus a
    /// maturity check over pending deposits.
    ///
    /// A failure against one address is logged and skipped; the other
    /// addresses still get scanned and the failed one resumes from its
    /// unchanged cursor next pass.
    pub async fn reconcile_all(&self) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();

        for wallet in self.wallets.all().await? {
            summary.addresses_scanned += 1;

            match self.scan_address(&wallet.user_id, &wallet.public_address).await {
                Ok((new_deposits, duplicates)) => {
                    summary.deposits_recorded += new_deposits.len();
                    summary.duplicates_skipped += duplicates;
                }
                Err(e) => {
                    warn!(
                        address = %wallet.public_address,
                        error = %e,
                        "deposit scan failed, will retry next pass"
                    );
                }
            }
        }

        summary.deposits_confirmed = self.confirm_matured_deposits().await?;

        if summary.deposits_recorded > 0 {
            info!(
                recorded = summary.deposits_recorded,
                duplicates = summary.duplicates_skipped,
                "reconciliation pass recorded new deposits"
            );
        }
        Ok(summary)
    }

    async fn scan_address(
        &self,
        user_id: &str,
        address: &str,
    ) -> Result<(Vec<OnchainTxRecord>, usize)> {
        let cursor = self.cursors.get(address).map(|c| c.clone());

        let transfers = self
            .network
            .transfers_to_address(address, cursor.as_deref(), self.config.batch_limit)
            .await?;

        let mut new_deposits = Vec::new();
        let mut duplicates = 0;

        // Oldest first: each processed item moves the cursor, so a failure
        // partway through resumes exactly where it stopped
        for transfer in transfers {
            match self.record_deposit(user_id, &transfer).await {
                Ok(Some(record)) => new_deposits.push(record),
                Ok(None) => duplicates += 1,
                Err(e) => {
                    warn!(signature = %transfer.signature, error = %e, "deposit record failed");
                    return Ok((new_deposits, duplicates));
                }
            }
            self.cursors
                .insert(address.to_string(), transfer.signature.clone());
        }

        Ok((new_deposits, duplicates))
    }

    /// Record one inbound transfer. Returns the stored record, or None for
    /// an already-known signature.
    async fn record_deposit(
        &self,
        user_id: &str,
        transfer: &InboundTransfer,
    ) -> Result<Option<OnchainTxRecord>> {
        let mut record = OnchainTxRecord::new(
            user_id,
            TxPurpose::Deposit,
            "native",
            transfer.amount,
            &transfer.signature,
        );

        match self.ledger.insert(record.clone()).await? {
            InsertOutcome::Duplicate => {
                debug!(signature = %transfer.signature, "deposit already recorded");
                Ok(None)
            }
            InsertOutcome::Inserted => {
                // The transfer came from a confirmed signature listing, so a
                // threshold of one is already met at observation time.
                // Deeper thresholds keep the record Pending with its slot
                // stored for the maturity pass.
                let status = if self.config.confirmation_threshold <= 1 {
                    TxStatus::Confirmed
                } else {
                    TxStatus::Pending
                };
                self.ledger
                    .update_status(record.id, status, Some(transfer.slot), transfer.block_time)
                    .await?;
                record.status = status;
                record.slot = Some(transfer.slot);
                record.block_time = transfer.block_time;

                info!(
                    user_id,
                    signature = %transfer.signature,
                    amount = transfer.amount,
                    ?status,
                    "deposit recorded"
                );
                Ok(Some(record))
            }
        }
    }

    /// Confirm pending deposits whose slot depth has reached the threshold.
    async fn confirm_matured_deposits(&self) -> Result<usize> {
        if self.config.confirmation_threshold <= 1 {
            return Ok(0);
        }

        let pending: Vec<OnchainTxRecord> = self
            .ledger
            .pending()
            .await?
            .into_iter()
            .filter(|r| r.purpose == TxPurpose::Deposit && r.slot.is_some())
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let tip = self.network.current_slot().await?;
        let mut confirmed = 0;

        for record in pending {
            let landed = record.slot.unwrap_or(tip);
            let depth = tip.saturating_sub(landed) + 1;
            if depth >= self.config.confirmation_threshold {
                self.ledger
                    .update_status(record.id, TxStatus::Confirmed, None, None)
                    .await?;
                info!(
                    signature = %record.signature,
                    depth,
                    "deposit reached confirmation threshold"
                );
                confirmed += 1;
            }
        }

        Ok(confirmed)
    }

    /// Run reconciliation until the task is cancelled.
    pub async fn run_loop(&self) {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        info!(interval_ms = self.config.poll_interval_ms, "deposit monitor started");

        loop {
            if let Err(e) = self.reconcile_all().await {
                warn!(error = %e, "reconciliation pass failed");
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::custody::EncryptedKey;
    use crate::ledger::{MemoryTxLedger, MemoryWalletStore};
    use crate::network::SimulatedNetwork;

    struct Fixture {
        monitor: DepositMonitor,
        network: Arc<SimulatedNetwork>,
        wallets: Arc<MemoryWalletStore>,
        ledger: Arc<MemoryTxLedger>,
    }

    fn fixture_with_config(config: MonitorConfig) -> Fixture {
        let network = Arc::new(SimulatedNetwork::new());
        let wallets = Arc::new(MemoryWalletStore::new());
        let ledger = Arc::new(MemoryTxLedger::new());
        let monitor = DepositMonitor::new(
            Arc::clone(&network) as Arc<dyn NetworkClient>,
            Arc::clone(&wallets) as Arc<dyn WalletStore>,
            Arc::clone(&ledger) as Arc<dyn TxLedger>,
            config,
        );
        Fixture {
            monitor,
            network,
            wallets,
            ledger,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_config(Config::default().monitor)
    }

    async fn add_wallet(fixture: &Fixture, user_id: &str) -> WalletRecord {
        let record = WalletRecord {
            user_id: user_id.to_string(),
            public_address: solana_sdk::pubkey::Pubkey::new_unique().to_string(),
            encrypted_private_key: EncryptedKey {
                algorithm: "aes-256-gcm".into(),
                iv: "aXY=".into(),
                tag: "dGFn".into(),
                ciphertext: "Y3Q=".into(),
            },
            created_at: chrono::Utc::now(),
        };
        fixture.wallets.insert(record.clone()).await.unwrap();
        record
    }

    #[tokio::test]
    async fn per_address_scan_returns_the_new_deposits() {
        let fixture = fixture();
        let wallet = add_wallet(&fixture, "alice").await;

        let sig_a = fixture
            .network
            .simulate_external_deposit(&wallet.public_address, 1_000_000);
        let sig_b = fixture
            .network
            .simulate_external_deposit(&wallet.public_address, 2_500_000);

        let deposits = fixture.monitor.monitor_deposits(&wallet).await.unwrap();
        assert_eq!(deposits.len(), 2);
        assert_eq!(deposits[0].signature, sig_a);
        assert_eq!(deposits[0].amount, 1_000_000);
        assert_eq!(deposits[1].signature, sig_b);
        assert!(deposits
            .iter()
            .all(|d| d.purpose == TxPurpose::Deposit && d.status == TxStatus::Confirmed));

        // Nothing new: the second scan returns an empty set
        let rescan = fixture.monitor.monitor_deposits(&wallet).await.unwrap();
        assert!(rescan.is_empty());
    }

    #[tokio::test]
    async fn records_deposits_once() {
        let fixture = fixture();
        let wallet = add_wallet(&fixture, "alice").await;

        let sig = fixture
            .network
            .simulate_external_deposit(&wallet.public_address, 1_000_000);

        let first = fixture.monitor.reconcile_all().await.unwrap();
        assert_eq!(first.deposits_recorded, 1);

        let record = fixture.ledger.find_by_signature(&sig).await.unwrap().unwrap();
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.amount, 1_000_000);
        assert_eq!(record.purpose, TxPurpose::Deposit);
        assert_eq!(record.status, TxStatus::Confirmed);

        // Second pass sees nothing new past the cursor
        let second = fixture.monitor.reconcile_all().await.unwrap();
        assert_eq!(second.deposits_recorded, 0);
        assert_eq!(fixture.ledger.for_user("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rescan_without_cursor_is_deduplicated() {
        let fixture = fixture();
        let wallet = add_wallet(&fixture, "bob").await;

        fixture
            .network
            .simulate_external_deposit(&wallet.public_address, 500);
        fixture.monitor.reconcile_all().await.unwrap();

        // Losing the cursor replays history; the signature constraint
        // absorbs the replay
        fixture.monitor.cursors.clear();
        let summary = fixture.monitor.reconcile_all().await.unwrap();

        assert_eq!(summary.deposits_recorded, 0);
        assert_eq!(summary.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn failed_scan_resumes_next_pass() {
        let fixture = fixture();
        let wallet = add_wallet(&fixture, "carol").await;

        fixture
            .network
            .simulate_external_deposit(&wallet.public_address, 100);
        fixture.network.inject_scan_fault();

        // Faulted pass records nothing but does not error out
        let faulted = fixture.monitor.reconcile_all().await.unwrap();
        assert_eq!(faulted.deposits_recorded, 0);

        let retry = fixture.monitor.reconcile_all().await.unwrap();
        assert_eq!(retry.deposits_recorded, 1);
    }

    #[tokio::test]
    async fn scans_multiple_wallets_independently() {
        let fixture = fixture();
        let wallet_a = add_wallet(&fixture, "dana").await;
        let wallet_b = add_wallet(&fixture, "evan").await;

        fixture
            .network
            .simulate_external_deposit(&wallet_a.public_address, 1_000);
        fixture
            .network
            .simulate_external_deposit(&wallet_b.public_address, 2_000);
        fixture
            .network
            .simulate_external_deposit(&wallet_b.public_address, 3_000);

        let summary = fixture.monitor.reconcile_all().await.unwrap();
        assert_eq!(summary.addresses_scanned, 2);
        assert_eq!(summary.deposits_recorded, 3);

        assert_eq!(fixture.ledger.for_user("dana").await.unwrap().len(), 1);
        assert_eq!(fixture.ledger.for_user("evan").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deep_threshold_confirms_only_after_maturity() {
        let mut config = Config::default().monitor;
        config.confirmation_threshold = 2;
        let fixture = fixture_with_config(config);
        let wallet = add_wallet(&fixture, "fern").await;

        let sig = fixture
            .network
            .simulate_external_deposit(&wallet.public_address, 750);

        // At observation the deposit sits at depth 1, below the threshold
        let first = fixture.monitor.reconcile_all().await.unwrap();
        assert_eq!(first.deposits_recorded, 1);
        assert_eq!(first.deposits_confirmed, 0);

        let record = fixture.ledger.find_by_signature(&sig).await.unwrap().unwrap();
        assert_eq!(record.status, TxStatus::Pending);
        assert!(record.slot.is_some());

        // A later slot builds on top; the next pass confirms it
        let other = add_wallet(&fixture, "gil").await;
        fixture
            .network
            .simulate_external_deposit(&other.public_address, 1);

        let second = fixture.monitor.reconcile_all().await.unwrap();
        assert_eq!(second.deposits_confirmed, 1);

        let record = fixture.ledger.find_by_signature(&sig).await.unwrap().unwrap();
        assert_eq!(record.status, TxStatus::Confirmed);
    }
}
