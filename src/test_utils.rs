//! Deterministic keys, mock chain collaborators and a fully signed delegation
//! fixture, shared by unit and integration tests. Built with `test-utils`.

use bech32::{ToBase32, Variant};
use bitcoin::consensus::serialize;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{
    BlockHash, BlockHeader, OutPoint, PackedLockTime, Script, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Txid, Witness, XOnlyPublicKey,
};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::context::{ChainSnapshot, Ctx, LimitedGasMeter, RefundIndexer, RefundableMsg};
use crate::crypto::adaptor::enc_sign_slashing_tx;
use crate::crypto::{sign_pop, sign_transaction, x_only_public_key, Bip340Signature};
use crate::delegation::{BtcDelegation, BtcUndelegation};
use crate::finality_provider::Description;
use crate::light_client::{BtcLightClient, Checkpointing, HeaderInfo};
use crate::msg::{
    MsgAddBtcDelegationInclusionProof, MsgAddCovenantSigs, MsgBtcUndelegate,
    MsgCreateBtcDelegation, MsgCreateFinalityProvider, MsgSelectiveSlashingEvidence,
};
use crate::params::{Params, Rate};
use crate::proof::{merkle_root, InclusionProof};
use crate::scripts::{StakingInfo, UnbondingInfo};
use crate::staking_tx;

/// Seeds of the covenant committee keys in [`test_params`], which are also
/// the committee of the `local` network.
pub const COVENANT_SEEDS: [u8; 3] = [200, 201, 202];
/// Seeds of the finality provider keys every [`DelegationFixture`] stakes to.
pub const FP_SEEDS: [u8; 2] = [100, 101];

pub fn secret_key(seed: u8) -> SecretKey {
    let bytes = Sha256::digest([seed]);
    SecretKey::from_slice(&bytes).unwrap()
}

pub fn test_address(seed: u8) -> String {
    bech32::encode("bbn", [seed; 20].to_base32(), Variant::Bech32).unwrap()
}

pub fn test_params() -> Params {
    Params {
        covenant_pks: COVENANT_SEEDS
            .iter()
            .map(|seed| x_only_public_key(&secret_key(*seed)))
            .collect(),
        covenant_quorum: 2,
        min_staking_value_sat: 10_000,
        max_staking_value_sat: 10_000_000_000,
        min_staking_time_blocks: 10,
        max_staking_time_blocks: 10_000,
        slashing_address: "tb1qv03wm7hxhag6awldvwacy0z42edtt6kwljrhd9"
            .parse()
            .unwrap(),
        min_slashing_tx_fee_sat: 1_000,
        slashing_rate: Rate::from_bps(1_000),
        min_commission_rate: Rate::from_bps(300),
        min_unbonding_time_blocks: 20,
        unbonding_fee_sat: 1_000,
        delegation_creation_base_gas_fee: 1_000,
    }
}

fn input(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: Script::new(),
        sequence: Sequence(u32::MAX),
        witness: Witness::default(),
    }
}

/// A transaction unique to `seed`, with no meaning beyond its txid.
pub fn dummy_tx(seed: u8) -> Transaction {
    Transaction {
        version: 2,
        lock_time: PackedLockTime(0),
        input: vec![input(OutPoint {
            txid: Txid::from_inner([seed; 32]),
            vout: 0,
        })],
        output: vec![TxOut {
            value: seed as u64 * 1_000,
            script_pubkey: Script::new(),
        }],
    }
}

#[derive(Clone, Debug, Default)]
pub struct MockLightClient {
    pub tip: u64,
    headers: BTreeMap<BlockHash, HeaderInfo>,
    orphaned: BTreeSet<BlockHash>,
}

impl MockLightClient {
    pub fn insert_header(&mut self, height: u64, header: BlockHeader) -> BlockHash {
        let hash = header.block_hash();
        self.headers.insert(hash, HeaderInfo { height, header });
        self.tip = self.tip.max(height);
        hash
    }

    /// Moves a header off the best chain, keeping it known.
    pub fn orphan(&mut self, hash: &BlockHash) {
        self.orphaned.insert(*hash);
    }
}

impl BtcLightClient for MockLightClient {
    fn tip_height(&self) -> u64 {
        self.tip
    }

    fn header(&self, hash: &BlockHash) -> Option<HeaderInfo> {
        self.headers.get(hash).cloned()
    }

    fn is_on_best_chain(&self, hash: &BlockHash) -> bool {
        self.headers.contains_key(hash) && !self.orphaned.contains(hash)
    }
}

/// Adds a block at `height` containing a coinbase and `tx`, returning its hash
/// and the inclusion proof of `tx`. Raises the tip to `height` if it is lower.
pub fn mock_block(
    light_client: &mut MockLightClient,
    height: u64,
    tx: &Transaction,
) -> (BlockHash, InclusionProof) {
    let coinbase = Transaction {
        version: 1,
        lock_time: PackedLockTime(height as u32),
        input: vec![input(OutPoint::null())],
        output: vec![],
    };
    let txids = [coinbase.txid(), tx.txid()];

    let header = BlockHeader {
        version: 1,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: TxMerkleNode::from_inner(merkle_root(&txids)),
        time: height as u32,
        bits: 0x207fffff,
        nonce: 0,
    };
    let hash = light_client.insert_header(height, header);
    let proof = InclusionProof::create(hash, &txids, tx.txid()).unwrap();

    (hash, proof)
}

#[derive(Clone, Copy, Debug)]
pub struct MockCheckpointing {
    pub k: u64,
    pub w: u64,
}

impl Checkpointing for MockCheckpointing {
    fn btc_confirmation_depth(&self) -> u64 {
        self.k
    }

    fn finalization_timeout(&self) -> u64 {
        self.w
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingRefunds(pub Vec<RefundableMsg>);

impl RefundIndexer for RecordingRefunds {
    fn index_refundable_msg(&mut self, msg: RefundableMsg) {
        self.0.push(msg);
    }
}

/// The collaborators of a transition, owned together so tests can build a
/// [`Ctx`] per request and inspect them in between.
pub struct TestEnv {
    pub light_client: MockLightClient,
    pub checkpointing: MockCheckpointing,
    pub refunds: RecordingRefunds,
    pub gas: LimitedGasMeter,
}

impl TestEnv {
    pub fn new(k: u64, w: u64) -> Self {
        Self {
            light_client: MockLightClient::default(),
            checkpointing: MockCheckpointing { k, w },
            refunds: RecordingRefunds::default(),
            gas: LimitedGasMeter::new(u64::MAX),
        }
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot::read(&self.light_client, &self.checkpointing)
    }

    pub fn ctx(&mut self) -> Ctx<'_> {
        Ctx {
            light_client: &self.light_client,
            checkpointing: &self.checkpointing,
            refunds: &mut self.refunds,
            gas: &mut self.gas,
        }
    }
}

/// A staker delegating to the finality providers of [`FP_SEEDS`] under
/// [`test_params`], with every transaction and signature a well-behaved
/// staker and covenant committee would produce.
#[derive(Clone, Debug)]
pub struct DelegationFixture {
    pub params: Params,
    pub staking_value: u64,
    pub staking_time: u16,
    pub unbonding_time: u16,
    seed: u8,
    staker_sk: SecretKey,
    fp_sks: Vec<SecretKey>,
    covenant_sks: Vec<SecretKey>,
}

impl DelegationFixture {
    pub fn new(staking_time: u16) -> Self {
        Self::with_seed(1, staking_time)
    }

    /// Fixtures with different seeds have different stakers and staking
    /// transactions.
    pub fn with_seed(seed: u8, staking_time: u16) -> Self {
        Self {
            params: test_params(),
            staking_value: 100_000,
            staking_time,
            unbonding_time: 101,
            seed,
            staker_sk: secret_key(seed),
            fp_sks: FP_SEEDS.iter().map(|s| secret_key(*s)).collect(),
            covenant_sks: COVENANT_SEEDS.iter().map(|s| secret_key(*s)).collect(),
        }
    }

    pub fn staker_addr(&self) -> String {
        test_address(self.seed)
    }

    pub fn staker_pk(&self) -> XOnlyPublicKey {
        x_only_public_key(&self.staker_sk)
    }

    pub fn fp_sks(&self) -> &[SecretKey] {
        &self.fp_sks
    }

    pub fn fp_pks(&self) -> Vec<XOnlyPublicKey> {
        self.fp_sks.iter().map(x_only_public_key).collect()
    }

    pub fn covenant_sk(&self, i: usize) -> SecretKey {
        self.covenant_sks[i]
    }

    pub fn staking_info(&self) -> StakingInfo {
        StakingInfo::new(
            self.staker_pk(),
            &self.fp_pks(),
            &self.params,
            self.staking_time,
            self.staking_value,
        )
        .unwrap()
    }

    /// Funds the staking output at index 1, after a change output.
    pub fn staking_tx(&self) -> Transaction {
        Transaction {
            version: 2,
            lock_time: PackedLockTime(0),
            input: vec![input(OutPoint {
                txid: Txid::from_inner([self.seed; 32]),
                vout: 0,
            })],
            output: vec![
                TxOut {
                    value: 5_000,
                    script_pubkey: Script::new(),
                },
                self.staking_info().staking_output,
            ],
        }
    }

    pub fn staking_output_idx(&self) -> u32 {
        1
    }

    pub fn staking_tx_hash(&self) -> Txid {
        self.staking_tx().txid()
    }

    pub fn staking_outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.staking_tx_hash(),
            vout: self.staking_output_idx(),
        }
    }

    pub fn slashing_tx(&self) -> Transaction {
        staking_tx::slashing_tx(
            self.staker_pk(),
            self.staking_outpoint(),
            self.staking_value,
            self.unbonding_time,
            &self.params,
        )
        .unwrap()
    }

    pub fn unbonding_value(&self) -> u64 {
        self.staking_value - self.params.unbonding_fee_sat
    }

    pub fn unbonding_info(&self) -> UnbondingInfo {
        UnbondingInfo::new(
            self.staker_pk(),
            &self.fp_pks(),
            &self.params,
            self.unbonding_time,
            self.unbonding_value(),
        )
        .unwrap()
    }

    pub fn unbonding_tx(&self) -> Transaction {
        staking_tx::unbonding_tx(
            self.staking_outpoint(),
            self.unbonding_info().unbonding_output,
        )
    }

    pub fn unbonding_slashing_tx(&self) -> Transaction {
        let outpoint = OutPoint {
            txid: self.unbonding_tx().txid(),
            vout: 0,
        };
        staking_tx::slashing_tx(
            self.staker_pk(),
            outpoint,
            self.unbonding_value(),
            self.unbonding_time,
            &self.params,
        )
        .unwrap()
    }

    fn delegator_slashing_sig(&self) -> Bip340Signature {
        let info = self.staking_info();
        sign_transaction(
            &self.slashing_tx(),
            &info.staking_output,
            &info.slashing_path,
            &self.staker_sk,
        )
        .unwrap()
    }

    fn delegator_unbonding_slashing_sig(&self) -> Bip340Signature {
        let info = self.unbonding_info();
        sign_transaction(
            &self.unbonding_slashing_tx(),
            &info.unbonding_output,
            &info.slashing_path,
            &self.staker_sk,
        )
        .unwrap()
    }

    pub fn create_msg(&self, proof: Option<InclusionProof>) -> MsgCreateBtcDelegation {
        let staker_addr = self.staker_addr();
        MsgCreateBtcDelegation {
            pop: sign_pop(&staker_addr, &self.staker_sk).unwrap().to_bytes(),
            staker_addr,
            btc_pk: self.staker_pk(),
            fp_btc_pk_list: self.fp_pks(),
            staking_time: self.staking_time as u32,
            staking_value: self.staking_value,
            staking_tx: serialize(&self.staking_tx()),
            staking_tx_inclusion_proof: proof,
            slashing_tx: serialize(&self.slashing_tx()),
            delegator_slashing_sig: self.delegator_slashing_sig().to_bytes(),
            unbonding_time: self.unbonding_time as u32,
            unbonding_tx: serialize(&self.unbonding_tx()),
            unbonding_slashing_tx: serialize(&self.unbonding_slashing_tx()),
            delegator_unbonding_slashing_sig: self.delegator_unbonding_slashing_sig().to_bytes(),
        }
    }

    /// The record [`create_msg`](Self::create_msg) produces when submitted
    /// without a proof under parameter version 0.
    pub fn delegation(&self) -> BtcDelegation {
        let staker_addr = self.staker_addr();
        BtcDelegation {
            pop: sign_pop(&staker_addr, &self.staker_sk).unwrap(),
            staker_addr,
            btc_pk: self.staker_pk(),
            fp_btc_pk_list: self.fp_pks(),
            staking_time: self.staking_time,
            start_height: 0,
            end_height: 0,
            total_sat: self.staking_value,
            staking_tx: self.staking_tx().into(),
            staking_output_idx: self.staking_output_idx(),
            slashing_tx: self.slashing_tx().into(),
            delegator_sig: self.delegator_slashing_sig(),
            covenant_sigs: vec![],
            unbonding_time: self.unbonding_time,
            btc_undelegation: BtcUndelegation {
                unbonding_tx: self.unbonding_tx().into(),
                slashing_tx: self.unbonding_slashing_tx().into(),
                delegator_slashing_sig: self.delegator_unbonding_slashing_sig(),
                delegator_unbonding_sig: None,
                covenant_slashing_sigs: vec![],
                covenant_unbonding_sig_list: vec![],
            },
            params_version: 0,
        }
    }

    /// Signatures of covenant member `i` over every transaction of the
    /// delegation.
    pub fn covenant_sigs_msg(&self, i: usize) -> MsgAddCovenantSigs {
        let cov_sk = self.covenant_sk(i);
        let staking = self.staking_info();
        let unbonding = self.unbonding_info();
        let fp_pks = self.fp_pks();

        MsgAddCovenantSigs {
            pk: x_only_public_key(&cov_sk),
            staking_tx_hash: self.staking_tx_hash(),
            slashing_tx_sigs: enc_sign_slashing_tx(
                &self.slashing_tx(),
                &staking.staking_output,
                &staking.slashing_path,
                &cov_sk,
                &fp_pks,
            )
            .unwrap(),
            unbonding_tx_sig: sign_transaction(
                &self.unbonding_tx(),
                &staking.staking_output,
                &staking.unbonding_path,
                &cov_sk,
            )
            .unwrap(),
            slashing_unbonding_tx_sigs: enc_sign_slashing_tx(
                &self.unbonding_slashing_tx(),
                &unbonding.unbonding_output,
                &unbonding.slashing_path,
                &cov_sk,
                &fp_pks,
            )
            .unwrap(),
        }
    }

    /// The staker's signature on the unbonding transaction.
    pub fn unbonding_sig(&self) -> Bip340Signature {
        let info = self.staking_info();
        sign_transaction(
            &self.unbonding_tx(),
            &info.staking_output,
            &info.unbonding_path,
            &self.staker_sk,
        )
        .unwrap()
    }

    pub fn undelegate_msg(&self) -> MsgBtcUndelegate {
        MsgBtcUndelegate {
            staking_tx_hash: self.staking_tx_hash(),
            unbonding_tx_sig: self.unbonding_sig(),
        }
    }

    /// Includes the staking tx in a new block at `height`.
    pub fn inclusion_proof_msg(
        &self,
        light_client: &mut MockLightClient,
        height: u64,
    ) -> MsgAddBtcDelegationInclusionProof {
        MsgAddBtcDelegationInclusionProof {
            staking_tx_hash: self.staking_tx_hash(),
            staking_tx_inclusion_proof: mock_block(light_client, height, &self.staking_tx()).1,
        }
    }

    /// Registration requests for each finality provider of the fixture.
    pub fn create_fp_msgs(&self) -> Vec<MsgCreateFinalityProvider> {
        self.fp_sks
            .iter()
            .zip(FP_SEEDS)
            .map(|(sk, seed)| {
                let addr = test_address(seed);
                MsgCreateFinalityProvider {
                    pop: sign_pop(&addr, sk).unwrap(),
                    addr,
                    description: Description {
                        moniker: format!("fp-{seed}"),
                        ..Default::default()
                    },
                    commission: Rate::from_bps(500),
                    btc_pk: x_only_public_key(sk),
                }
            })
            .collect()
    }

    /// Evidence revealing the secret key of finality provider `i`.
    pub fn slashing_evidence_msg(&self, i: usize) -> MsgSelectiveSlashingEvidence {
        MsgSelectiveSlashingEvidence {
            staking_tx_hash: self.staking_tx_hash(),
            recovered_fp_btc_sk: self.fp_sks[i].secret_bytes().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_keys_are_disjoint() {
        let fixture = DelegationFixture::new(100);
        let mut keys = fixture.fp_pks();
        keys.extend(fixture.params.covenant_pks.iter().copied());
        keys.push(fixture.staker_pk());
        keys.push(DelegationFixture::with_seed(2, 100).staker_pk());

        let count = keys.len();
        keys.sort_by_key(|pk| pk.serialize());
        keys.dedup();
        assert_eq!(keys.len(), count);
    }

    #[test]
    fn mock_block_includes_tx() {
        let mut lc = MockLightClient::default();
        let tx = dummy_tx(3);
        let (hash, proof) = mock_block(&mut lc, 42, &tx);

        assert_eq!(lc.tip_height(), 42);
        assert!(lc.is_on_best_chain(&hash));
        let header = lc.header(&hash).unwrap();
        assert_eq!(
            proof.merkle_root(tx.txid()).unwrap(),
            header.header.merkle_root.into_inner()
        );
    }
}
