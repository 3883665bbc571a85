//! Atomic Transaction Codec
//!
//! Linear binary encoding used by the P-, X- and C-Chain atomic transaction
//! formats: big-endian integers, `u32` length-prefixed lists, a `u16` codec
//! version prefix and `u32` type IDs.

use alloy::primitives::Address;
use thiserror::Error;

use crate::ids::{Id, ShortId, checksum};

pub const CODEC_VERSION: u16 = 0;

/// secp256k1fx type IDs
pub const SECP_TRANSFER_INPUT: u32 = 5;
pub const SECP_TRANSFER_OUTPUT: u32 = 7;
pub const SECP_CREDENTIAL: u32 = 9;

pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unexpected end of input at offset {0}")]
    Truncated(usize),

    #[error("Unsupported codec version {0}")]
    Version(u16),

    #[error("Unknown type ID {0}")]
    UnknownType(u32),

    #[error("Invalid hex payload: {0}")]
    Hex(String),

    #[error("Bad checksum")]
    Checksum,
}

/// Append-only big-endian writer
#[derive(Debug, Default)]
pub struct Packer {
    buf: Vec<u8>,
}

impl Packer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn fixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Length-prefixed byte slice
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.u32(bytes.len() as u32);
        self.fixed(bytes)
    }

    pub fn len_prefix(&mut self, len: usize) -> &mut Self {
        self.u32(len as u32)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an encoded buffer
pub struct Unpacker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated(self.pos))?;
        let slice = self.buf.get(self.pos..end).ok_or(CodecError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    pub fn u16(&mut self) -> Result<u16, CodecError> {
        let mut b = [0u8; 2];
        b.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(b))
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(b))
    }

    pub fn u64(&mut self) -> Result<u64, CodecError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(b))
    }

    pub fn id(&mut self) -> Result<Id, CodecError> {
        let mut b = [0u8; 32];
        b.copy_from_slice(self.take(32)?);
        Ok(Id(b))
    }

    pub fn short_id(&mut self) -> Result<ShortId, CodecError> {
        let mut b = [0u8; 20];
        b.copy_from_slice(self.take(20)?);
        Ok(ShortId(b))
    }
}

/// Hex with a trailing 4-byte checksum, as the JSON APIs expect
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut payload = bytes.to_vec();
    payload.extend_from_slice(&checksum(bytes));
    format!("0x{}", hex::encode(payload))
}

pub fn decode_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    let raw = hex::decode(text.trim_start_matches("0x")).map_err(|e| CodecError::Hex(e.to_string()))?;
    if raw.len() < 4 {
        return Err(CodecError::Checksum);
    }
    let (body, sum) = raw.split_at(raw.len() - 4);
    if checksum(body) != sum {
        return Err(CodecError::Checksum);
    }
    Ok(body.to_vec())
}

/// Single-signature-threshold ownership of an output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputOwners {
    pub locktime: u64,
    pub threshold: u32,
    pub addrs: Vec<ShortId>,
}

impl OutputOwners {
    pub fn single(owner: ShortId) -> Self {
        Self {
            locktime: 0,
            threshold: 1,
            addrs: vec![owner],
        }
    }

    /// Index of `owner` among the addresses, when it alone can spend
    pub fn spendable_by(&self, owner: &ShortId) -> Option<u32> {
        if self.locktime != 0 || self.threshold != 1 {
            return None;
        }
        self.addrs.iter().position(|a| a == owner).map(|i| i as u32)
    }

    fn pack(&self, p: &mut Packer) {
        p.u64(self.locktime).u32(self.threshold).len_prefix(self.addrs.len());
        for addr in &self.addrs {
            p.fixed(addr.as_bytes());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferableOutput {
    pub asset_id: Id,
    pub amount: u64,
    pub owners: OutputOwners,
}

impl TransferableOutput {
    pub fn pack(&self, p: &mut Packer) {
        p.fixed(self.asset_id.as_bytes()).u32(SECP_TRANSFER_OUTPUT).u64(self.amount);
        self.owners.pack(p);
    }

    fn encoded(&self) -> Vec<u8> {
        let mut p = Packer::new();
        self.pack(&mut p);
        p.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferableInput {
    pub tx_id: Id,
    pub output_index: u32,
    pub asset_id: Id,
    pub amount: u64,
    pub sig_indices: Vec<u32>,
}

impl TransferableInput {
    pub fn pack(&self, p: &mut Packer) {
        p.fixed(self.tx_id.as_bytes())
            .u32(self.output_index)
            .fixed(self.asset_id.as_bytes())
            .u32(SECP_TRANSFER_INPUT)
            .u64(self.amount)
            .len_prefix(self.sig_indices.len());
        for i in &self.sig_indices {
            p.u32(*i);
        }
    }

    pub fn spend(utxo: &Utxo, sig_index: u32) -> Self {
        Self {
            tx_id: utxo.tx_id,
            output_index: utxo.output_index,
            asset_id: utxo.asset_id,
            amount: utxo.amount,
            sig_indices: vec![sig_index],
        }
    }
}

/// Unspent secp256k1 transfer output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub tx_id: Id,
    pub output_index: u32,
    pub asset_id: Id,
    pub amount: u64,
    pub owners: OutputOwners,
}

impl Utxo {
    pub fn encode(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.u16(CODEC_VERSION)
            .fixed(self.tx_id.as_bytes())
            .u32(self.output_index)
            .fixed(self.asset_id.as_bytes())
            .u32(SECP_TRANSFER_OUTPUT)
            .u64(self.amount);
        self.owners.pack(&mut p);
        p.finish()
    }

    /// Decode a UTXO; outputs other than plain transfers yield `None`
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, CodecError> {
        let mut u = Unpacker::new(bytes);
        let version = u.u16()?;
        if version != CODEC_VERSION {
            return Err(CodecError::Version(version));
        }
        let tx_id = u.id()?;
        let output_index = u.u32()?;
        let asset_id = u.id()?;
        if u.u32()? != SECP_TRANSFER_OUTPUT {
            return Ok(None);
        }
        let amount = u.u64()?;
        let locktime = u.u64()?;
        let threshold = u.u32()?;
        let count = u.u32()? as usize;
        let mut addrs = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            addrs.push(u.short_id()?);
        }
        Ok(Some(Self {
            tx_id,
            output_index,
            asset_id,
            amount,
            owners: OutputOwners {
                locktime,
                threshold,
                addrs,
            },
        }))
    }
}

/// C-Chain account credit from an atomic import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmOutput {
    pub address: Address,
    pub amount: u64,
    pub asset_id: Id,
}

/// C-Chain account debit for an atomic export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmInput {
    pub address: Address,
    pub amount: u64,
    pub asset_id: Id,
    pub nonce: u64,
}

/// Virtual machine a UTXO transaction is encoded for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtxoVm {
    Platform,
    Avm,
}

impl UtxoVm {
    fn base_type(&self) -> u32 {
        match self {
            UtxoVm::Platform => 0x22,
            UtxoVm::Avm => 0,
        }
    }

    fn import_type(&self) -> u32 {
        match self {
            UtxoVm::Platform => 0x11,
            UtxoVm::Avm => 3,
        }
    }

    fn export_type(&self) -> u32 {
        match self {
            UtxoVm::Platform => 0x12,
            UtxoVm::Avm => 4,
        }
    }
}

const EVM_IMPORT_TYPE: u32 = 0;
const EVM_EXPORT_TYPE: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTx {
    pub network_id: u32,
    pub blockchain_id: Id,
    pub outs: Vec<TransferableOutput>,
    pub ins: Vec<TransferableInput>,
    pub memo: Vec<u8>,
}

impl BaseTx {
    fn pack(&self, p: &mut Packer) {
        p.u32(self.network_id).fixed(self.blockchain_id.as_bytes());
        pack_outputs(p, &self.outs);
        pack_inputs(p, &self.ins);
        p.bytes(&self.memo);
    }
}

fn pack_outputs(p: &mut Packer, outs: &[TransferableOutput]) {
    p.len_prefix(outs.len());
    for out in outs {
        out.pack(p);
    }
}

fn pack_inputs(p: &mut Packer, ins: &[TransferableInput]) {
    p.len_prefix(ins.len());
    for input in ins {
        input.pack(p);
    }
}

/// Canonical ordering required by the ledgers
pub fn sort_inputs(ins: &mut [TransferableInput]) {
    ins.sort_by(|a, b| (a.tx_id, a.output_index).cmp(&(b.tx_id, b.output_index)));
}

pub fn sort_outputs(outs: &mut [TransferableOutput]) {
    outs.sort_by_key(|o| o.encoded());
}

/// Unsigned primary-network atomic or UTXO transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicTx {
    Base {
        vm: UtxoVm,
        base: BaseTx,
    },
    Export {
        vm: UtxoVm,
        base: BaseTx,
        destination_chain: Id,
        exported: Vec<TransferableOutput>,
    },
    Import {
        vm: UtxoVm,
        base: BaseTx,
        source_chain: Id,
        imported: Vec<TransferableInput>,
    },
    EvmExport {
        network_id: u32,
        blockchain_id: Id,
        destination_chain: Id,
        ins: Vec<EvmInput>,
        exported: Vec<TransferableOutput>,
    },
    EvmImport {
        network_id: u32,
        blockchain_id: Id,
        source_chain: Id,
        imported: Vec<TransferableInput>,
        outs: Vec<EvmOutput>,
    },
}

impl AtomicTx {
    /// Bytes that are hashed and signed
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.u16(CODEC_VERSION);
        match self {
            AtomicTx::Base { vm, base } => {
                p.u32(vm.base_type());
                base.pack(&mut p);
            }
            AtomicTx::Export {
                vm,
                base,
                destination_chain,
                exported,
            } => {
                p.u32(vm.export_type());
                base.pack(&mut p);
                p.fixed(destination_chain.as_bytes());
                pack_outputs(&mut p, exported);
            }
            AtomicTx::Import {
                vm,
                base,
                source_chain,
                imported,
            } => {
                p.u32(vm.import_type());
                base.pack(&mut p);
                p.fixed(source_chain.as_bytes());
                pack_inputs(&mut p, imported);
            }
            AtomicTx::EvmExport {
                network_id,
                blockchain_id,
                destination_chain,
                ins,
                exported,
            } => {
                p.u32(EVM_EXPORT_TYPE)
                    .u32(*network_id)
                    .fixed(blockchain_id.as_bytes())
                    .fixed(destination_chain.as_bytes())
                    .len_prefix(ins.len());
                for input in ins {
                    p.fixed(input.address.as_slice())
                        .u64(input.amount)
                        .fixed(input.asset_id.as_bytes())
                        .u64(input.nonce);
                }
                pack_outputs(&mut p, exported);
            }
            AtomicTx::EvmImport {
                network_id,
                blockchain_id,
                source_chain,
                imported,
                outs,
            } => {
                p.u32(EVM_IMPORT_TYPE)
                    .u32(*network_id)
                    .fixed(blockchain_id.as_bytes())
                    .fixed(source_chain.as_bytes());
                pack_inputs(&mut p, imported);
                p.len_prefix(outs.len());
                for out in outs {
                    p.fixed(out.address.as_slice())
                        .u64(out.amount)
                        .fixed(out.asset_id.as_bytes());
                }
            }
        }
        p.finish()
    }

    /// One credential per spent input, in input order
    pub fn signature_count(&self) -> usize {
        match self {
            AtomicTx::Base { base, .. } | AtomicTx::Export { base, .. } => base.ins.len(),
            AtomicTx::Import { base, imported, .. } => base.ins.len() + imported.len(),
            AtomicTx::EvmExport { ins, .. } => ins.len(),
            AtomicTx::EvmImport { imported, .. } => imported.len(),
        }
    }

    /// Size once each credential carries one signature
    pub fn signed_len(&self) -> usize {
        self.unsigned_bytes().len() + 4 + self.signature_count() * (4 + 4 + SIGNATURE_LEN)
    }

    /// Total value consumed, in nAVAX
    pub fn consumed(&self) -> u128 {
        match self {
            AtomicTx::Base { base, .. } | AtomicTx::Export { base, .. } => sum_inputs(&base.ins),
            AtomicTx::Import { base, imported, .. } => sum_inputs(&base.ins) + sum_inputs(imported),
            AtomicTx::EvmExport { ins, .. } => ins.iter().map(|i| i.amount as u128).sum(),
            AtomicTx::EvmImport { imported, .. } => sum_inputs(imported),
        }
    }

    /// Total value produced (change, exports and credits), in nAVAX
    pub fn produced(&self) -> u128 {
        match self {
            AtomicTx::Base { base, .. } | AtomicTx::Import { base, .. } => sum_outputs(&base.outs),
            AtomicTx::Export { base, exported, .. } => sum_outputs(&base.outs) + sum_outputs(exported),
            AtomicTx::EvmExport { exported, .. } => sum_outputs(exported),
            AtomicTx::EvmImport { outs, .. } => outs.iter().map(|o| o.amount as u128).sum(),
        }
    }

    /// Encode with one single-signature credential per input
    pub fn signed_bytes(&self, signatures: &[[u8; SIGNATURE_LEN]]) -> Vec<u8> {
        let mut p = Packer::new();
        p.fixed(&self.unsigned_bytes()).len_prefix(signatures.len());
        for sig in signatures {
            p.u32(SECP_CREDENTIAL).len_prefix(1).fixed(sig);
        }
        p.finish()
    }
}

fn sum_inputs(ins: &[TransferableInput]) -> u128 {
    ins.iter().map(|i| i.amount as u128).sum()
}

fn sum_outputs(outs: &[TransferableOutput]) -> u128 {
    outs.iter().map(|o| o.amount as u128).sum()
}
