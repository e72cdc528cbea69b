// Copyright (c) 2026 The Lattica Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{keccak256, Address, ContractId, Hash256, PublicKey, Signature, TokenId, U256, I256};
use crate::vm::opcodes::OP;
use crate::vm::{Value, VmErr};
use bincode::{Decode, Encode};
use std::convert::TryFrom;

/// Max call depth.
pub const MAX_FRAMES: usize = 64;

/// Max values per frame stack.
pub const STACK_SIZE: usize = 256;

/// VM max memory size in bytes.
pub const MEMORY_SIZE: usize = 512_000;

/// Max methods per script.
pub const MAX_METHODS: usize = 256;

/// Gas charged per byte of argument passed across a contract call.
pub const GAS_PER_CALL_ARG_BYTE: u64 = 1;

/// One callable unit of a script. Arguments fill the first `arg_count`
/// local slots; `local_count` more slots follow, zero-initialized.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Method {
    pub arg_count: u8,
    pub local_count: u8,
    pub code: Vec<u8>,
}

/// Compiled bytecode: a vector of methods. Method 0 is the entry point
/// for transaction scripts and unlock scripts.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Script {
    pub version: u8,
    pub methods: Vec<Method>,
}

impl Script {
    #[must_use]
    pub fn single(arg_count: u8, local_count: u8, code: Vec<u8>) -> Self {
        Self {
            version: 1,
            methods: vec![Method {
                arg_count,
                local_count,
                code,
            }],
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        crate::codec::encode_to_vec(self).unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VmErr> {
        crate::codec::decode(bytes).map_err(|_| VmErr::BadFormat)
    }

    /// Script hash, the payload of P2SH addresses.
    #[must_use]
    pub fn script_hash(&self, key: &str) -> Hash256 {
        Hash256::hash_from_slice(self.to_bytes(), key)
    }

    /// Runs method 0 in the stateless context (unlock scripts). Returns
    /// the final stack of the root frame.
    pub fn execute_stateless(
        &self,
        env: &TxEnv<'_>,
        args: Vec<Value>,
        gas: &mut GasMeter,
    ) -> Result<Vec<Value>, VmErr> {
        let mut state = StatelessState;
        run(self, env, &mut state, gas, 0, args)
    }

    /// Runs method 0 in the stateful context (transaction scripts and
    /// contract entry points).
    pub fn execute_stateful<S: StateAccess>(
        &self,
        env: &TxEnv<'_>,
        state: &mut S,
        args: Vec<Value>,
        gas: &mut GasMeter,
    ) -> Result<Vec<Value>, VmErr> {
        run(self, env, state, gas, 0, args)
    }
}

/// Per-transaction execution environment shared by both contexts.
pub struct TxEnv<'a> {
    pub tx_id: Hash256,
    pub block_height: u64,
    pub block_timestamp: i64,
    pub signatures: &'a [Signature],
}

/// Gas meter. Out of gas is a terminal failure; the caller discards all
/// staged state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasMeter {
    limit: u64,
    used: u64,
}

impl GasMeter {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), VmErr> {
        let used = self.used.saturating_add(amount);

        if used > self.limit {
            self.used = self.limit;
            return Err(VmErr::OutOfGas);
        }

        self.used = used;
        Ok(())
    }

    #[must_use]
    pub fn used(&self) -> u64 {
        self.used
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }
}

/// World access surface for the stateful opcodes. The transaction
/// executor in the chain layer implements this over staged world state;
/// the stateless implementation rejects every call.
pub trait StateAccess {
    fn load_contract(
        &mut self,
        id: &ContractId,
    ) -> Result<crate::chain::world_state::ContractState, VmErr>;
    fn store_fields(&mut self, id: &ContractId, fields: Vec<Value>) -> Result<(), VmErr>;
    fn approve_asset(&mut self, from: &Address, amount: &U256) -> Result<(), VmErr>;
    fn approve_token(
        &mut self,
        from: &Address,
        token: &TokenId,
        amount: &U256,
    ) -> Result<(), VmErr>;
    fn transfer_approved(
        &mut self,
        from: &Address,
        to: &Address,
        amount: &U256,
    ) -> Result<(), VmErr>;
    fn transfer_token_approved(
        &mut self,
        from: &Address,
        to: &Address,
        token: &TokenId,
        amount: &U256,
    ) -> Result<(), VmErr>;
    fn transfer_from_self(
        &mut self,
        contract: &ContractId,
        to: &Address,
        amount: &U256,
    ) -> Result<(), VmErr>;
    fn mint_token(&mut self, contract: &ContractId, amount: &U256) -> Result<(), VmErr>;
    fn burn_token(
        &mut self,
        from: &Address,
        token: &TokenId,
        amount: &U256,
    ) -> Result<(), VmErr>;
    fn create_contract(
        &mut self,
        code: Script,
        fields: Vec<Value>,
        funder: &Address,
        amount: &U256,
    ) -> Result<ContractId, VmErr>;
    fn destroy_contract(&mut self, id: &ContractId, beneficiary: &Address) -> Result<(), VmErr>;
    fn emit_event(
        &mut self,
        contract: &ContractId,
        event_type: u32,
        fields: Vec<Value>,
    ) -> Result<(), VmErr>;
}

/// Unlock scripts get no world access at all.
pub struct StatelessState;

macro_rules! stateless_reject {
    ($($name:ident($($arg:ident: $ty:ty),*) -> $ret:ty;)*) => {
        impl StateAccess for StatelessState {
            $(
                fn $name(&mut self, $($arg: $ty),*) -> $ret {
                    $(let _ = $arg;)*
                    Err(VmErr::StatefulContext)
                }
            )*
        }
    };
}

stateless_reject! {
    load_contract(id: &ContractId) -> Result<crate::chain::world_state::ContractState, VmErr>;
    store_fields(id: &ContractId, fields: Vec<Value>) -> Result<(), VmErr>;
    approve_asset(from: &Address, amount: &U256) -> Result<(), VmErr>;
    approve_token(from: &Address, token: &TokenId, amount: &U256) -> Result<(), VmErr>;
    transfer_approved(from: &Address, to: &Address, amount: &U256) -> Result<(), VmErr>;
    transfer_token_approved(from: &Address, to: &Address, token: &TokenId, amount: &U256) -> Result<(), VmErr>;
    transfer_from_self(contract: &ContractId, to: &Address, amount: &U256) -> Result<(), VmErr>;
    mint_token(contract: &ContractId, amount: &U256) -> Result<(), VmErr>;
    burn_token(from: &Address, token: &TokenId, amount: &U256) -> Result<(), VmErr>;
    create_contract(code: Script, fields: Vec<Value>, funder: &Address, amount: &U256) -> Result<ContractId, VmErr>;
    destroy_contract(id: &ContractId, beneficiary: &Address) -> Result<(), VmErr>;
    emit_event(contract: &ContractId, event_type: u32, fields: Vec<Value>) -> Result<(), VmErr>;
}

struct ContractScope {
    id: ContractId,
    fields: Vec<Value>,
    dirty: bool,
    destroyed: bool,
}

struct Frame {
    stack: Vec<Value>,
    locals: Vec<Value>,
    i_ptr: usize,
    code: Vec<u8>,
    owns_scope: bool,
}

impl Frame {
    fn new(method: &Method, mut args: Vec<Value>, owns_scope: bool) -> Result<Self, VmErr> {
        if args.len() != method.arg_count as usize {
            return Err(VmErr::BadFormat);
        }

        args.resize(
            method.arg_count as usize + method.local_count as usize,
            Value::Bool(false),
        );

        Ok(Self {
            stack: Vec::with_capacity(16),
            locals: args,
            i_ptr: 0,
            code: method.code.clone(),
            owns_scope,
        })
    }

    fn push(&mut self, memory: &mut usize, value: Value) -> Result<(), VmErr> {
        if self.stack.len() >= STACK_SIZE {
            return Err(VmErr::StackOverflow);
        }

        *memory += value.size();
        if *memory > MEMORY_SIZE {
            return Err(VmErr::OutOfMemory);
        }

        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, VmErr> {
        self.stack.pop().ok_or(VmErr::StackUnderflow)
    }

    fn fetch_u8(&mut self) -> Result<u8, VmErr> {
        let byte = *self.code.get(self.i_ptr).ok_or(VmErr::BadFormat)?;
        self.i_ptr += 1;
        Ok(byte)
    }

    fn fetch_i16(&mut self) -> Result<i16, VmErr> {
        let bytes = self
            .code
            .get(self.i_ptr..self.i_ptr + 2)
            .ok_or(VmErr::BadFormat)?;
        self.i_ptr += 2;
        Ok(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn fetch_u16(&mut self) -> Result<u16, VmErr> {
        let bytes = self
            .code
            .get(self.i_ptr..self.i_ptr + 2)
            .ok_or(VmErr::BadFormat)?;
        self.i_ptr += 2;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn fetch_bytes(&mut self, len: usize) -> Result<Vec<u8>, VmErr> {
        let bytes = self
            .code
            .get(self.i_ptr..self.i_ptr + len)
            .ok_or(VmErr::BadFormat)?
            .to_vec();
        self.i_ptr += len;
        Ok(bytes)
    }
}

/// Interpreter state machine.
enum Machine {
    Running,
    Halted(Vec<Value>),
    Failed(VmErr),
}

#[allow(clippy::too_many_lines)]
fn run<S: StateAccess>(
    script: &Script,
    env: &TxEnv<'_>,
    state: &mut S,
    gas: &mut GasMeter,
    method_idx: usize,
    args: Vec<Value>,
) -> Result<Vec<Value>, VmErr> {
    if script.version != 1 {
        return Err(VmErr::BadFormat);
    }

    if script.methods.is_empty() || script.methods.len() > MAX_METHODS {
        return Err(VmErr::BadFormat);
    }

    let method = script.methods.get(method_idx).ok_or(VmErr::UnknownMethod)?;
    let mut frames = vec![Frame::new(method, args, false)?];
    let mut scopes: Vec<ContractScope> = Vec::new();
    // Scripts loaded by CallExternal, addressed by (scope generation)
    let mut scope_scripts: Vec<Script> = Vec::new();
    let mut memory: usize = 0;
    let mut sig_cursor: usize = 0;
    let mut machine = Machine::Running;

    while matches!(machine, Machine::Running) {
        machine = step(
            script,
            env,
            state,
            gas,
            &mut frames,
            &mut scopes,
            &mut scope_scripts,
            &mut memory,
            &mut sig_cursor,
        );
    }

    match machine {
        Machine::Halted(stack) => Ok(stack),
        Machine::Failed(err) => Err(err),
        Machine::Running => unreachable!(),
    }
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
fn step<S: StateAccess>(
    script: &Script,
    env: &TxEnv<'_>,
    state: &mut S,
    gas: &mut GasMeter,
    frames: &mut Vec<Frame>,
    scopes: &mut Vec<ContractScope>,
    scope_scripts: &mut Vec<Script>,
    memory: &mut usize,
    sig_cursor: &mut usize,
) -> Machine {
    match step_inner(
        script,
        env,
        state,
        gas,
        frames,
        scopes,
        scope_scripts,
        memory,
        sig_cursor,
    ) {
        Ok(machine) => machine,
        Err(err) => Machine::Failed(err),
    }
}

#[allow(clippy::too_many_arguments, clippy::too_many_lines)]
fn step_inner<S: StateAccess>(
    script: &Script,
    env: &TxEnv<'_>,
    state: &mut S,
    gas: &mut GasMeter,
    frames: &mut Vec<Frame>,
    scopes: &mut Vec<ContractScope>,
    scope_scripts: &mut Vec<Script>,
    memory: &mut usize,
    sig_cursor: &mut usize,
) -> Result<Machine, VmErr> {
    let frame = frames.last_mut().ok_or(VmErr::Error("no frame"))?;

    // Running off the end of the body is an implicit return
    if frame.i_ptr >= frame.code.len() {
        return pop_frame(state, frames, scopes, scope_scripts, memory);
    }

    let op = OP::try_from(frame.fetch_u8()?).map_err(|_| VmErr::BadFormat)?;
    gas.charge(op.gas())?;

    match op {
        OP::ConstTrue => frame.push(memory, Value::Bool(true))?,
        OP::ConstFalse => frame.push(memory, Value::Bool(false))?,

        OP::U256Const => {
            let bytes = frame.fetch_bytes(32)?;
            let mut buf = [0; 32];
            buf.copy_from_slice(&bytes);
            frame.push(memory, Value::U256(U256::from_be_bytes(buf)))?;
        }

        OP::I256Const => {
            let bytes = frame.fetch_bytes(32)?;
            let mut buf = [0; 32];
            buf.copy_from_slice(&bytes);
            frame.push(memory, Value::I256(I256::from_be_bytes(buf)))?;
        }

        OP::BytesConst => {
            let len = frame.fetch_u16()? as usize;
            let bytes = frame.fetch_bytes(len)?;
            frame.push(memory, Value::Bytes(bytes))?;
        }

        OP::AddressConst => {
            let len = frame.fetch_u16()? as usize;
            let bytes = frame.fetch_bytes(len)?;
            let address: Address =
                crate::codec::decode(&bytes).map_err(|_| VmErr::BadFormat)?;
            frame.push(memory, Value::Addr(address))?;
        }

        OP::Pop => {
            frame.pop()?;
        }

        OP::Dup => {
            let top = frame.stack.last().ok_or(VmErr::StackUnderflow)?.clone();
            frame.push(memory, top)?;
        }

        OP::Swap => {
            let len = frame.stack.len();
            if len < 2 {
                return Err(VmErr::StackUnderflow);
            }
            frame.stack.swap(len - 1, len - 2);
        }

        OP::LoadLocal => {
            let idx = frame.fetch_u8()? as usize;
            let value = frame
                .locals
                .get(idx)
                .ok_or(VmErr::IndexOutOfBounds)?
                .clone();
            frame.push(memory, value)?;
        }

        OP::StoreLocal => {
            let idx = frame.fetch_u8()? as usize;
            let value = frame.pop()?;
            *frame.locals.get_mut(idx).ok_or(VmErr::IndexOutOfBounds)? = value;
        }

        OP::U256Add | OP::U256Sub | OP::U256Mul | OP::U256Div | OP::U256Mod | OP::U256ModAdd
        | OP::U256ModSub | OP::U256ModMul => {
            let b = frame.pop()?.into_u256()?;
            let a = frame.pop()?.into_u256()?;
            let out = match op {
                OP::U256Add => a.checked_add(&b).ok_or(VmErr::ArithmeticError)?,
                OP::U256Sub => a.checked_sub(&b).ok_or(VmErr::ArithmeticError)?,
                OP::U256Mul => a.checked_mul(&b).ok_or(VmErr::ArithmeticError)?,
                OP::U256Div => a.checked_div(&b).ok_or(VmErr::ArithmeticError)?,
                OP::U256Mod => a.checked_rem(&b).ok_or(VmErr::ArithmeticError)?,
                OP::U256ModAdd => a.wrapping_add(&b),
                OP::U256ModSub => a.wrapping_sub(&b),
                OP::U256ModMul => a.wrapping_mul(&b),
                _ => unreachable!(),
            };
            frame.push(memory, Value::U256(out))?;
        }

        OP::I256Add | OP::I256Sub | OP::I256Mul | OP::I256Div | OP::I256Mod => {
            let b = frame.pop()?.into_i256()?;
            let a = frame.pop()?.into_i256()?;
            let out = match op {
                OP::I256Add => a.checked_add(&b).ok_or(VmErr::ArithmeticError)?,
                OP::I256Sub => a.checked_sub(&b).ok_or(VmErr::ArithmeticError)?,
                OP::I256Mul => a.checked_mul(&b).ok_or(VmErr::ArithmeticError)?,
                OP::I256Div => a.checked_div(&b).ok_or(VmErr::ArithmeticError)?,
                OP::I256Mod => a.checked_rem(&b).ok_or(VmErr::ArithmeticError)?,
                _ => unreachable!(),
            };
            frame.push(memory, Value::I256(out))?;
        }

        OP::U256Shl | OP::U256Shr => {
            let shift = frame.pop()?.into_u256()?;
            let value = frame.pop()?.into_u256()?;
            let shift = shift.to_u64().map_or(256, |s| s.min(256) as u32);
            let out = match op {
                OP::U256Shl => value.shl(shift),
                OP::U256Shr => value.shr(shift),
                _ => unreachable!(),
            };
            frame.push(memory, Value::U256(out))?;
        }

        OP::U256BitAnd | OP::U256BitOr | OP::U256Xor => {
            let b = frame.pop()?.into_u256()?;
            let a = frame.pop()?.into_u256()?;
            let out = match op {
                OP::U256BitAnd => a.bitand(&b),
                OP::U256BitOr => a.bitor(&b),
                OP::U256Xor => a.bitxor(&b),
                _ => unreachable!(),
            };
            frame.push(memory, Value::U256(out))?;
        }

        OP::U256Lt | OP::U256Le | OP::U256Gt | OP::U256Ge => {
            let b = frame.pop()?.into_u256()?;
            let a = frame.pop()?.into_u256()?;
            let out = match op {
                OP::U256Lt => a < b,
                OP::U256Le => a <= b,
                OP::U256Gt => a > b,
                OP::U256Ge => a >= b,
                _ => unreachable!(),
            };
            frame.push(memory, Value::Bool(out))?;
        }

        OP::I256Lt | OP::I256Le | OP::I256Gt | OP::I256Ge => {
            let b = frame.pop()?.into_i256()?;
            let a = frame.pop()?.into_i256()?;
            let out = match op {
                OP::I256Lt => a < b,
                OP::I256Le => a <= b,
                OP::I256Gt => a > b,
                OP::I256Ge => a >= b,
                _ => unreachable!(),
            };
            frame.push(memory, Value::Bool(out))?;
        }

        OP::Eq | OP::Neq => {
            let b = frame.pop()?;
            let a = frame.pop()?;

            if std::mem::discriminant(&a) != std::mem::discriminant(&b) {
                return Err(VmErr::TypeMismatch);
            }

            let eq = a == b;
            frame.push(memory, Value::Bool(if op == OP::Eq { eq } else { !eq }))?;
        }

        OP::BoolAnd | OP::BoolOr => {
            let b = frame.pop()?.into_bool()?;
            let a = frame.pop()?.into_bool()?;
            let out = match op {
                OP::BoolAnd => a && b,
                OP::BoolOr => a || b,
                _ => unreachable!(),
            };
            frame.push(memory, Value::Bool(out))?;
        }

        OP::BoolNot => {
            let a = frame.pop()?.into_bool()?;
            frame.push(memory, Value::Bool(!a))?;
        }

        OP::BytesConcat => {
            let b = frame.pop()?.into_bytes()?;
            let mut a = frame.pop()?.into_bytes()?;
            a.extend_from_slice(&b);
            frame.push(memory, Value::Bytes(a))?;
        }

        OP::BytesLen => {
            let a = frame.pop()?.into_bytes()?;
            frame.push(memory, Value::U256(U256::from(a.len() as u64)))?;
        }

        OP::Keccak256 => {
            let a = frame.pop()?.into_bytes()?;
            frame.push(memory, Value::Bytes(keccak256(&a).0.to_vec()))?;
        }

        OP::Jump => {
            let offset = frame.fetch_i16()?;
            jump(frame, offset)?;
        }

        OP::IfFalseJump => {
            let offset = frame.fetch_i16()?;
            let cond = frame.pop()?.into_bool()?;

            if !cond {
                jump(frame, offset)?;
            }
        }

        OP::CallLocal => {
            let target = frame.fetch_u8()? as usize;
            // Execution sits inside a contract exactly when a scope is
            // open; local calls then dispatch on the contract's script.
            let callee_script = match scope_scripts.last() {
                Some(contract_script) => contract_script,
                None => script,
            };
            let method = callee_script
                .methods
                .get(target)
                .ok_or(VmErr::UnknownMethod)?
                .clone();
            let args = pop_args(frames.last_mut().unwrap(), method.arg_count as usize)?;
            push_frame(frames, Frame::new(&method, args, false)?)?;
        }

        OP::CallExternal => {
            let target = frame.fetch_u8()? as usize;
            let contract_id = frame.pop()?.into_hash()?;
            let contract = state.load_contract(&contract_id)?;
            let method = contract
                .code
                .methods
                .get(target)
                .ok_or(VmErr::UnknownMethod)?
                .clone();
            let args = pop_args(frames.last_mut().unwrap(), method.arg_count as usize)?;

            let arg_bytes: usize = args.iter().map(Value::size).sum();
            gas.charge(arg_bytes as u64 * GAS_PER_CALL_ARG_BYTE)?;

            scopes.push(ContractScope {
                id: contract_id,
                fields: contract.fields.clone(),
                dirty: false,
                destroyed: false,
            });
            scope_scripts.push(contract.code);
            push_frame(frames, Frame::new(&method, args, true)?)?;
        }

        OP::Return => {
            return pop_frame(state, frames, scopes, scope_scripts, memory);
        }

        OP::Assert => {
            let cond = frame.pop()?.into_bool()?;

            if !cond {
                return Err(VmErr::AssertionFailed);
            }
        }

        OP::TxId => {
            frame.push(memory, Value::Bytes(env.tx_id.0.to_vec()))?;
        }

        OP::BlockHeight => {
            frame.push(memory, Value::U256(U256::from(env.block_height)))?;
        }

        OP::BlockTimestamp => {
            frame.push(memory, Value::I256(I256::from(env.block_timestamp)))?;
        }

        OP::VerifySig => {
            let key_bytes = frame.pop()?.into_bytes()?;
            let public_key =
                PublicKey::from_bytes(&key_bytes).map_err(|_| VmErr::InvalidSignature)?;
            let signature = env
                .signatures
                .get(*sig_cursor)
                .ok_or(VmErr::InvalidSignature)?;
            *sig_cursor += 1;

            if !public_key.verify(env.tx_id.as_bytes(), signature) {
                return Err(VmErr::InvalidSignature);
            }
        }

        OP::ApproveAsset => {
            let amount = frame.pop()?.into_u256()?;
            let from = frame.pop()?.into_addr()?;
            state.approve_asset(&from, &amount)?;
        }

        OP::ApproveToken => {
            let amount = frame.pop()?.into_u256()?;
            let token = frame.pop()?.into_hash()?;
            let from = frame.pop()?.into_addr()?;
            state.approve_token(&from, &token, &amount)?;
        }

        OP::TransferApproved => {
            let amount = frame.pop()?.into_u256()?;
            let to = frame.pop()?.into_addr()?;
            let from = frame.pop()?.into_addr()?;
            state.transfer_approved(&from, &to, &amount)?;
        }

        OP::TransferTokenApproved => {
            let amount = frame.pop()?.into_u256()?;
            let token = frame.pop()?.into_hash()?;
            let to = frame.pop()?.into_addr()?;
            let from = frame.pop()?.into_addr()?;
            state.transfer_token_approved(&from, &to, &token, &amount)?;
        }

        OP::TransferFromSelf => {
            let amount = frame.pop()?.into_u256()?;
            let to = frame.pop()?.into_addr()?;
            let scope = scopes.last().ok_or(VmErr::Error("no contract scope"))?;
            state.transfer_from_self(&scope.id, &to, &amount)?;
        }

        OP::MintToken => {
            let amount = frame.pop()?.into_u256()?;
            let scope = scopes.last().ok_or(VmErr::Error("no contract scope"))?;
            state.mint_token(&scope.id, &amount)?;
        }

        OP::BurnToken => {
            let amount = frame.pop()?.into_u256()?;
            let token = frame.pop()?.into_hash()?;
            let from = frame.pop()?.into_addr()?;
            state.burn_token(&from, &token, &amount)?;
        }

        OP::LoadField => {
            let idx = frame.fetch_u8()? as usize;
            let scope = scopes.last().ok_or(VmErr::Error("no contract scope"))?;
            let value = scope
                .fields
                .get(idx)
                .ok_or(VmErr::IndexOutOfBounds)?
                .clone();
            frames
                .last_mut()
                .unwrap()
                .push(memory, value)?;
        }

        OP::StoreField => {
            let idx = frame.fetch_u8()? as usize;
            let value = frame.pop()?;
            let scope = scopes.last_mut().ok_or(VmErr::Error("no contract scope"))?;
            *scope.fields.get_mut(idx).ok_or(VmErr::IndexOutOfBounds)? = value;
            scope.dirty = true;
        }

        OP::SelfAddress => {
            let scope = scopes.last().ok_or(VmErr::Error("no contract scope"))?;
            let address = Value::Addr(Address::Contract(scope.id));
            frames.last_mut().unwrap().push(memory, address)?;
        }

        OP::CreateContract => {
            let field_count = frame.fetch_u8()? as usize;
            let amount = frame.pop()?.into_u256()?;
            let funder = frame.pop()?.into_addr()?;
            let code_bytes = frame.pop()?.into_bytes()?;
            let code = Script::from_bytes(&code_bytes)?;
            let fields = pop_args(frames.last_mut().unwrap(), field_count)?;

            let id = state.create_contract(code, fields, &funder, &amount)?;
            frames
                .last_mut()
                .unwrap()
                .push(memory, Value::Bytes(id.0.to_vec()))?;
        }

        OP::DestroyContract => {
            let beneficiary = frame.pop()?.into_addr()?;
            let scope = scopes.last_mut().ok_or(VmErr::Error("no contract scope"))?;
            scope.destroyed = true;
            let id = scope.id;
            state.destroy_contract(&id, &beneficiary)?;
        }

        OP::EmitEvent => {
            let field_count = frame.fetch_u8()? as usize;
            let event_type = frame.pop()?.into_u256()?;
            let event_type = event_type
                .to_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or(VmErr::TypeMismatch)?;
            let fields = pop_args(frames.last_mut().unwrap(), field_count)?;
            let scope = scopes.last().ok_or(VmErr::Error("no contract scope"))?;
            state.emit_event(&scope.id, event_type, fields)?;
        }
    }

    Ok(Machine::Running)
}

fn jump(frame: &mut Frame, offset: i16) -> Result<(), VmErr> {
    let target = frame.i_ptr as i64 + i64::from(offset);

    if target < 0 || target > frame.code.len() as i64 {
        return Err(VmErr::InvalidJump);
    }

    frame.i_ptr = target as usize;
    Ok(())
}

fn pop_args(frame: &mut Frame, count: usize) -> Result<Vec<Value>, VmErr> {
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        args.push(frame.pop()?);
    }
    args.reverse();
    Ok(args)
}

fn push_frame(frames: &mut Vec<Frame>, frame: Frame) -> Result<(), VmErr> {
    if frames.len() >= MAX_FRAMES {
        return Err(VmErr::StackOverflow);
    }

    frames.push(frame);
    Ok(())
}

fn pop_frame<S: StateAccess>(
    state: &mut S,
    frames: &mut Vec<Frame>,
    scopes: &mut Vec<ContractScope>,
    scope_scripts: &mut Vec<Script>,
    memory: &mut usize,
) -> Result<Machine, VmErr> {
    let frame = frames.pop().ok_or(VmErr::Error("no frame"))?;

    if frame.owns_scope {
        let scope = scopes.pop().ok_or(VmErr::Error("scope imbalance"))?;
        scope_scripts.pop();

        if scope.dirty && !scope.destroyed {
            state.store_fields(&scope.id, scope.fields)?;
        }
    }

    match frames.last_mut() {
        None => Ok(Machine::Halted(frame.stack)),
        Some(caller) => {
            for value in frame.stack {
                caller.push(memory, value)?;
            }

            Ok(Machine::Running)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Keypair;

    fn env<'a>(signatures: &'a [Signature]) -> TxEnv<'a> {
        TxEnv {
            tx_id: Hash256([9; 32]),
            block_height: 10,
            block_timestamp: 1_700_000_000_000,
            signatures,
        }
    }

    fn push_u256(code: &mut Vec<u8>, v: u64) {
        code.push(OP::U256Const as u8);
        code.extend_from_slice(&U256::from(v).to_be_bytes());
    }

    #[test]
    fn it_adds_and_halts_with_the_result() {
        let mut code = vec![];
        push_u256(&mut code, 2);
        push_u256(&mut code, 40);
        code.push(OP::U256Add as u8);

        let script = Script::single(0, 0, code);
        let mut gas = GasMeter::new(1_000);
        let stack = script
            .execute_stateless(&env(&[]), vec![], &mut gas)
            .unwrap();

        assert_eq!(stack, vec![Value::U256(U256::from(42u64))]);
        assert!(gas.used() > 0);
    }

    #[test]
    fn checked_arithmetic_fails_loudly() {
        let mut code = vec![];
        push_u256(&mut code, 1);
        push_u256(&mut code, 0);
        code.push(OP::U256Div as u8);

        let script = Script::single(0, 0, code);
        let result = script.execute_stateless(&env(&[]), vec![], &mut GasMeter::new(1_000));
        assert_eq!(result, Err(VmErr::ArithmeticError));
    }

    #[test]
    fn modular_arithmetic_wraps() {
        let mut code = vec![];
        code.push(OP::U256Const as u8);
        code.extend_from_slice(&U256::max_value().to_be_bytes());
        push_u256(&mut code, 1);
        code.push(OP::U256ModAdd as u8);

        let script = Script::single(0, 0, code);
        let stack = script
            .execute_stateless(&env(&[]), vec![], &mut GasMeter::new(1_000))
            .unwrap();
        assert_eq!(stack, vec![Value::U256(U256::zero())]);
    }

    #[test]
    fn assert_aborts_execution() {
        let code = vec![OP::ConstFalse as u8, OP::Assert as u8];
        let script = Script::single(0, 0, code);
        let result = script.execute_stateless(&env(&[]), vec![], &mut GasMeter::new(1_000));
        assert_eq!(result, Err(VmErr::AssertionFailed));
    }

    #[test]
    fn it_runs_out_of_gas() {
        // while true: push/pop
        let mut code = vec![];
        code.push(OP::ConstTrue as u8);
        code.push(OP::Pop as u8);
        code.push(OP::Jump as u8);
        code.extend_from_slice(&(-5i16).to_le_bytes());

        let script = Script::single(0, 0, code);
        let result = script.execute_stateless(&env(&[]), vec![], &mut GasMeter::new(10_000));
        assert_eq!(result, Err(VmErr::OutOfGas));
    }

    #[test]
    fn if_false_jump_skips_the_branch() {
        // arg0 ? 1 : 2
        let mut code = vec![];
        code.push(OP::LoadLocal as u8);
        code.push(0);
        code.push(OP::IfFalseJump as u8);
        code.extend_from_slice(&36i16.to_le_bytes()); // skip push(1) and the jump-to-end
        push_u256(&mut code, 1); // 33 bytes
        code.push(OP::Jump as u8);
        code.extend_from_slice(&33i16.to_le_bytes()); // skip push(2)
        push_u256(&mut code, 2);

        let script = Script::single(1, 0, code);

        let stack = script
            .execute_stateless(&env(&[]), vec![Value::Bool(true)], &mut GasMeter::new(1_000))
            .unwrap();
        assert_eq!(stack, vec![Value::U256(U256::from(1u64))]);

        let stack = script
            .execute_stateless(&env(&[]), vec![Value::Bool(false)], &mut GasMeter::new(1_000))
            .unwrap();
        assert_eq!(stack, vec![Value::U256(U256::from(2u64))]);
    }

    #[test]
    fn local_calls_pass_args_and_return_values() {
        // method 1: double(x) = x + x
        let mut double = vec![];
        double.push(OP::LoadLocal as u8);
        double.push(0);
        double.push(OP::LoadLocal as u8);
        double.push(0);
        double.push(OP::U256Add as u8);

        // method 0: double(21)
        let mut main = vec![];
        push_u256(&mut main, 21);
        main.push(OP::CallLocal as u8);
        main.push(1);

        let script = Script {
            version: 1,
            methods: vec![
                Method {
                    arg_count: 0,
                    local_count: 0,
                    code: main,
                },
                Method {
                    arg_count: 1,
                    local_count: 0,
                    code: double,
                },
            ],
        };

        let stack = script
            .execute_stateless(&env(&[]), vec![], &mut GasMeter::new(10_000))
            .unwrap();
        assert_eq!(stack, vec![Value::U256(U256::from(42u64))]);
    }

    #[test]
    fn verify_sig_consumes_signatures_in_order() {
        let keypair = Keypair::generate();
        let tx_id = Hash256([9; 32]);
        let signature = keypair.sign(tx_id.as_bytes());
        let signatures = vec![signature];

        let mut code = vec![];
        code.push(OP::BytesConst as u8);
        code.extend_from_slice(&32u16.to_le_bytes());
        code.extend_from_slice(&keypair.public().to_bytes());
        code.push(OP::VerifySig as u8);
        code.push(OP::ConstTrue as u8);

        let script = Script::single(0, 0, code);
        let stack = script
            .execute_stateless(&env(&signatures), vec![], &mut GasMeter::new(1_000))
            .unwrap();
        assert_eq!(stack, vec![Value::Bool(true)]);

        // Wrong signer fails
        let other = Keypair::generate();
        let bad_sigs = vec![other.sign(tx_id.as_bytes())];
        let result = script.execute_stateless(&env(&bad_sigs), vec![], &mut GasMeter::new(1_000));
        assert_eq!(result, Err(VmErr::InvalidSignature));

        // Missing signature fails
        let result = script.execute_stateless(&env(&[]), vec![], &mut GasMeter::new(1_000));
        assert_eq!(result, Err(VmErr::InvalidSignature));
    }

    #[test]
    fn stateful_ops_are_rejected_statelessly() {
        let mut code = vec![];
        code.push(OP::AddressConst as u8);
        let address_bytes = Address::random().to_bytes();
        code.extend_from_slice(&(address_bytes.len() as u16).to_le_bytes());
        code.extend_from_slice(&address_bytes);
        push_u256(&mut code, 1);
        code.push(OP::ApproveAsset as u8);

        let script = Script::single(0, 0, code);
        let result = script.execute_stateless(&env(&[]), vec![], &mut GasMeter::new(10_000));
        assert_eq!(result, Err(VmErr::StatefulContext));
    }

    #[test]
    fn deep_recursion_overflows() {
        // method 0 calls itself forever
        let code = vec![OP::CallLocal as u8, 0];
        let script = Script::single(0, 0, code);
        let result = script.execute_stateless(&env(&[]), vec![], &mut GasMeter::new(1_000_000));
        assert_eq!(result, Err(VmErr::StackOverflow));
    }

    #[test]
    fn script_hash_commits_to_the_code() {
        let a = Script::single(0, 0, vec![OP::ConstTrue as u8]);
        let b = Script::single(0, 0, vec![OP::ConstFalse as u8]);
        assert_ne!(a.script_hash("k"), b.script_hash("k"));
        assert_eq!(a.script_hash("k"), a.script_hash("k"));

        let decoded = Script::from_bytes(&a.to_bytes()).unwrap();
        assert_eq!(decoded, a);
    }
}
