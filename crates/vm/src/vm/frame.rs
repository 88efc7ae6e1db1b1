use mal_bytecode::Chunk;

use crate::gc::{GcTracer, ObjRef, Trace};
use crate::value::Value;

/// One active call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallFrame {
    /// The closure being executed
    pub closure: ObjRef,
    /// The function of `closure`, cached to skip one lookup per instruction
    pub function: ObjRef,
    pub ip: usize,
    /// Stack index of slot 0: the callee, or the receiver for methods
    pub slots: usize,
}

impl CallFrame {
    pub fn new(closure: ObjRef, function: ObjRef, slots: usize) -> Self {
        CallFrame {
            closure,
            function,
            ip: 0,
            slots,
        }
    }

    pub fn read_u8(&mut self, chunk: &Chunk<Value>) -> u8 {
        let byte = chunk.read_u8(self.ip);
        self.ip += 1;
        byte
    }

    pub fn read_u16(&mut self, chunk: &Chunk<Value>) -> u16 {
        let value = chunk.read_u16(self.ip);
        self.ip += 2;
        value
    }

    /// Line of the instruction that was read last
    pub fn line(&self, chunk: &Chunk<Value>) -> u32 {
        chunk.line_at(self.ip.saturating_sub(1))
    }
}

impl Trace for CallFrame {
    fn trace(&self, tracer: &mut dyn GcTracer) {
        tracer.mark_object(self.closure);
        tracer.mark_object(self.function);
    }
}
