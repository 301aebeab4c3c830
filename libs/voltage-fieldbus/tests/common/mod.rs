//! Shared helpers for integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::time::Instant;
use voltage_fieldbus::{
    Command, CommandHandler, FunctionCode, IoTransport, Result, StreamTransport,
};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// One write as seen by the scripted transport
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub at: Instant,
    pub data: Vec<u8>,
}

/// Stream transport driven by a responder closure
///
/// Every write is recorded and passed to the responder, whose chunks are then
/// handed out one per `read_available` call. With nothing queued a read waits
/// out its full timeout.
pub struct ScriptedTransport {
    responder: Responder,
    pending: VecDeque<Vec<u8>>,
    writes: Arc<Mutex<Vec<RecordedWrite>>>,
}

impl ScriptedTransport {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            pending: VecDeque::new(),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Never answers
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    /// Answers every request with the same chunks
    pub fn replying(chunks: Vec<Vec<u8>>) -> Self {
        Self::new(move |_| chunks.clone())
    }

    /// Handle to the write log that outlives the transport
    pub fn writes(&self) -> Arc<Mutex<Vec<RecordedWrite>>> {
        Arc::clone(&self.writes)
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writes.lock().unwrap().push(RecordedWrite {
            at: Instant::now(),
            data: data.to_vec(),
        });
        let chunks = (self.responder)(data);
        self.pending.extend(chunks);
        Ok(())
    }

    async fn read_available(&mut self, max: usize, wait: Duration) -> Result<Vec<u8>> {
        match self.pending.pop_front() {
            Some(mut chunk) => {
                if chunk.len() > max {
                    let rest = chunk.split_off(max);
                    self.pending.push_front(rest);
                }
                Ok(chunk)
            },
            None => {
                tokio::time::sleep(wait).await;
                Ok(Vec::new())
            },
        }
    }
}

/// Connected pair of in-memory stream transports
pub fn duplex_pair() -> (IoTransport<DuplexStream>, IoTransport<DuplexStream>) {
    let (a, b) = tokio::io::duplex(4096);
    (IoTransport::new(a), IoTransport::new(b))
}

/// Minimal register image for listener tests
#[derive(Debug, Default)]
pub struct TestBank {
    pub coils: Vec<u16>,
    pub discretes: Vec<u16>,
    pub holding: Vec<u16>,
    pub input: Vec<u16>,
    pub calls: usize,
}

impl TestBank {
    pub fn with_size(size: usize) -> Self {
        Self {
            coils: vec![0; size],
            discretes: vec![0; size],
            holding: vec![0; size],
            input: vec![0; size],
            calls: 0,
        }
    }
}

/// Handler serving a shared [`TestBank`], exception 0x02 outside its range
pub fn bank_handler(bank: Arc<Mutex<TestBank>>) -> Arc<dyn CommandHandler> {
    Arc::new(move |cmd: &mut Command| {
        let mut bank = bank.lock().unwrap();
        bank.calls += 1;
        let start = cmd.offset as usize;
        let end = start + cmd.count as usize;

        let Some(function) = cmd.function() else {
            cmd.set_exception(0x01);
            return;
        };
        let table = match function {
            FunctionCode::ReadCoils | FunctionCode::WriteSingleCoil | FunctionCode::WriteMultipleCoils => {
                &mut bank.coils
            },
            FunctionCode::ReadDiscreteInputs => &mut bank.discretes,
            FunctionCode::ReadHoldingRegisters
            | FunctionCode::WriteSingleRegister
            | FunctionCode::WriteMultipleRegisters => &mut bank.holding,
            FunctionCode::ReadInputRegisters => &mut bank.input,
        };
        if end > table.len() {
            cmd.set_exception(0x02);
            return;
        }
        if function.is_write() {
            table[start..end].copy_from_slice(&cmd.data);
        } else {
            cmd.data.copy_from_slice(&table[start..end]);
        }
    })
}
