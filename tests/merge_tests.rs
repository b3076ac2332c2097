//! Integration tests for folding returns into their calls.

use evtrace::codec::{Word0, encode_call, encode_return, try_merge, with_timestamp};
use evtrace::control::{DO_IPC, DO_WRAP};
use evtrace::events::{IRQ, IRQ_RET, SYSCALL64, SYSRET64, TRAP, TRAP_RET};
use evtrace::{MockPlatform, TraceConfig, Tracer};

fn tracer() -> Tracer<MockPlatform> {
    let t = Tracer::new(
        MockPlatform::new(),
        TraceConfig::default().with_arena_blocks(4),
    )
    .unwrap();
    t.on();
    t
}

fn call_then_return(t: &Tracer<MockPlatform>, nr: u64, gap: u64, retval: i64) {
    t.platform().set_time(1000);
    t.trace_1(SYSCALL64 | nr, 0);
    t.platform().set_time(1000 + gap);
    t.trace_1(SYSRET64 | nr, retval as u64);
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_short_call_merges() {
    let t = tracer();
    call_then_return(&t, 5, 200, -5);
    t.flush();

    assert_eq!(t.get_count(), 1);
    let w = Word0::decode(t.get_word(0));
    assert_eq!(w.event as u64, SYSCALL64 | 5);
    assert_eq!(w.delta, 200);
    assert_eq!(w.retval, 0xfb);
    assert_eq!(w.retval_signed(), -5);
    assert_eq!(w.timestamp, 1000);
}

#[test]
fn test_long_call_does_not_merge() {
    let t = tracer();
    call_then_return(&t, 5, 400, -5);
    t.flush();

    assert_eq!(t.get_count(), 2);
    let ret = Word0::decode(t.get_word(0));
    let call = Word0::decode(t.get_word(1));
    assert_eq!(ret.event as u64, SYSRET64 | 5);
    assert_eq!(ret.arg, 0xfffb);
    assert_eq!(call.delta, 0);
}

#[test]
fn test_delta_limit_is_255() {
    let t = tracer();
    call_then_return(&t, 1, 255, 0);
    call_then_return(&t, 1, 256, 0);
    t.flush();
    // merged pair, then call + return
    assert_eq!(t.get_count(), 3);
    assert_eq!(Word0::decode(t.get_word(2)).delta, 255);
}

#[test]
fn test_zero_elapsed_marks_merge() {
    let t = tracer();
    call_then_return(&t, 3, 0, 1);
    t.flush();
    let w = Word0::decode(t.get_word(0));
    assert_eq!(w.delta, 1);
    assert_eq!(w.retval, 1);
}

#[test]
fn test_large_retval_not_merged() {
    let t = tracer();
    call_then_return(&t, 2, 10, 128);
    call_then_return(&t, 2, 10, -129);
    call_then_return(&t, 2, 10, 127);
    call_then_return(&t, 2, 10, -128);
    t.flush();
    assert_eq!(t.get_count(), 2 + 2 + 1 + 1);
}

#[test]
fn test_trap_and_irq_returns_merge() {
    let t = tracer();
    t.platform().set_time(50);
    t.trace_1(TRAP | 14, 0);
    t.trace_1(TRAP_RET | 14, 0);
    t.trace_1(IRQ | 0x20, 0);
    t.trace_1(IRQ_RET | 0x20, 0);
    t.flush();
    assert_eq!(t.get_count(), 2);
}

#[test]
fn test_no_merge_across_flush() {
    let t = tracer();
    t.platform().set_time(10);
    t.trace_1(SYSCALL64 | 9, 0);
    t.flush();
    t.on();
    t.trace_1(SYSRET64 | 9, 0);
    t.flush();
    assert_eq!(t.get_count(), 2);
    assert_eq!(t.stat(), 2);
}

#[test]
fn test_merge_stores_ipc_high_nibble() {
    let t = tracer();
    t.off();
    t.reset(DO_IPC | DO_WRAP).unwrap();
    t.on();
    t.platform().set_time(1000);
    t.trace_1(SYSCALL64 | 5, 0);
    t.platform().set_time(1200);
    // IPC of 2.0 maps to bucket 12
    t.platform().set_inst_retired(200 * 8 * 16);
    t.trace_1(SYSRET64 | 5, 0);
    t.flush();

    let snap = t.snapshot();
    assert_eq!(snap.blocks[0].ipc, vec![0xc0]);
}

// =============================================================================
// Codec-Level Merge Tests
// =============================================================================

#[test]
fn test_merge_wraps_20_bit_timestamp() {
    let call = with_timestamp(encode_call(SYSCALL64 | 1, 0), 0xf_fff0);
    let ret = with_timestamp(encode_return(SYSRET64 | 1, 2), 0x1_0000_0010);
    let merged = try_merge(call, ret).unwrap();
    assert_eq!(Word0::decode(merged).delta, 0x20);
}

#[test]
fn test_merge_refuses_already_merged() {
    let call = encode_call(SYSCALL64 | 1, 0);
    let ret = encode_return(SYSRET64 | 1, 0);
    let once = try_merge(call, ret).unwrap();
    assert_eq!(try_merge(once, ret), None);
}
