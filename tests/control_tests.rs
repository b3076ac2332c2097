//! Integration tests for the numeric control surface and session states.

use evtrace::arena::{BLOCK_WORDS, FIRST_HEADER_WORDS};
use evtrace::codec::{BlockHeader, FLAG_IPC, FLAG_WRAP, Word0, encode_call, with_length};
use evtrace::control::*;
use evtrace::events::MARK_A;
use evtrace::{Error, MockPlatform, SessionState, TaskIdentity, TraceConfig, Tracer};

fn tracer() -> Tracer<MockPlatform> {
    Tracer::new(MockPlatform::new(), TraceConfig::default()).unwrap()
}

fn mark(i: u64) -> u64 {
    encode_call(MARK_A, i)
}

// =============================================================================
// Basic Session Tests
// =============================================================================

#[test]
fn test_ten_inserts_read_back_newest_first() {
    let t = tracer();
    assert_eq!(t.control(CMD_RESET, 0), 0);
    assert_eq!(t.control(CMD_ON, 0), 1);
    for i in 0..10 {
        assert_eq!(t.control(CMD_INSERT1, mark(i)), 1);
    }
    assert_eq!(t.control(CMD_OFF, 0), 0);
    t.control(CMD_FLUSH, 0);

    assert_eq!(t.control(CMD_GETCOUNT, 0), 10);
    assert_eq!(Word0::decode(t.control(CMD_GETWORD, 0)).arg, 9);
    assert_eq!(Word0::decode(t.control(CMD_GETWORD, 9)).arg, 0);
    assert_eq!(t.control(CMD_GETWORD, 10), 0);
    assert_eq!(Word0::decode(t.control(CMD_GETWORD, 3)).event as u64, MARK_A);
}

#[test]
fn test_count_is_sum_of_claimed_lengths() {
    let t = tracer();
    t.on();
    let mut expected = 0;
    for len in 1..=8usize {
        let mut rec = [0u64; 8];
        rec[0] = encode_call(with_length(0x100, len), len as u64);
        assert_eq!(t.insert_n(&rec[..len]), len as u64);
        expected += len as u64;
    }
    t.insert_1(mark(1));
    expected += 1;
    t.flush();
    assert_eq!(t.get_count(), expected);
}

#[test]
fn test_off_and_flush_idempotent() {
    let t = tracer();
    t.on();
    t.insert_1(mark(0));
    assert_eq!(t.control(CMD_OFF, 0), 0);
    assert_eq!(t.control(CMD_OFF, 0), 0);
    assert_eq!(t.state(), SessionState::Stopped);

    let first = t.control(CMD_FLUSH, 0);
    assert_eq!(first, (BLOCK_WORDS - FIRST_HEADER_WORDS - 1) as u64);
    assert_eq!(t.control(CMD_FLUSH, 0), 0);
    assert_eq!(t.control(CMD_GETCOUNT, 0), 1);
}

#[test]
fn test_flush_turns_tracing_off() {
    let t = tracer();
    t.on();
    t.control(CMD_FLUSH, 0);
    assert_eq!(t.control(CMD_TEST, 0), 0);
}

#[test]
fn test_getcount_turns_tracing_off() {
    let t = tracer();
    t.on();
    t.control(CMD_GETCOUNT, 0);
    assert!(!t.is_tracing());
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_reset_while_running_refused() {
    let t = tracer();
    t.on();
    t.insert_1(mark(7));
    assert_eq!(t.control(CMD_RESET, DO_WRAP), CONTROL_FAILURE);
    assert_eq!(t.reset(0), Err(Error::TracingActive));
    assert_eq!(t.state(), SessionState::Running);
    assert!(!t.wrap_enabled());
    assert_eq!(t.stat(), 1);
}

#[test]
fn test_unknown_command_changes_nothing() {
    let t = tracer();
    t.on();
    assert_eq!(t.control(99, 0), CONTROL_FAILURE);
    assert_eq!(t.control(!CMD_ON, 0), CONTROL_FAILURE);
    assert!(t.is_tracing());
    assert_eq!(t.stat(), 0);
}

#[test]
fn test_reset_clears_log() {
    let t = tracer();
    t.on();
    t.insert_1(mark(1));
    t.off();
    assert_eq!(t.control(CMD_RESET, 0), 0);
    assert_eq!(t.control(CMD_STAT, 0), 0);
    assert_eq!(t.control(CMD_GETCOUNT, 0), 0);
    assert_eq!(t.cursors()[0].limit(), 0);
}

#[test]
fn test_reset_clears_pid_filter() {
    let t = tracer();
    t.on();
    assert!(t.trace_pid_name(5, b"cron\0\0\0\0\0\0\0\0\0\0\0\0"));
    assert!(!t.trace_pid_name(5, b"cron\0\0\0\0\0\0\0\0\0\0\0\0"));
    t.off();

    assert_eq!(t.control(CMD_RESET, 0), 0);
    assert!(!t.pid_filter().contains(5));
    t.on();
    assert!(t.trace_pid_name(5, b"cron\0\0\0\0\0\0\0\0\0\0\0\0"));
}

#[test]
fn test_counters_set_up_once_per_cpu_until_reset() {
    let t = tracer();
    t.on();
    // overflow the first block into a second one
    for i in 0..(BLOCK_WORDS - FIRST_HEADER_WORDS) as u64 {
        assert_eq!(t.insert_1(mark(i & 0xffff)), 1);
    }
    assert_eq!(t.stat(), 2);
    assert_eq!(t.platform().setup_calls(), vec![0]);

    t.off();
    assert_eq!(t.control(CMD_RESET, 0), 0);
    t.on();
    t.insert_1(mark(1));
    assert_eq!(t.platform().setup_calls(), vec![0, 0]);
}

// =============================================================================
// Insert Command Tests
// =============================================================================

#[test]
fn test_insert_commands_need_tracing() {
    let t = tracer();
    assert_eq!(t.control(CMD_INSERT1, mark(1)), 0);
    assert_eq!(t.control(!CMD_INSERT1, mark(1)), 1);
    assert_eq!(t.stat(), 1);
}

#[test]
fn test_insertn_from_user_memory() {
    let t = tracer();
    let rec = [encode_call(0x130, 5), 0x1111, 0x2222, 0, 0, 0, 0, 0];
    t.platform().map_user(0x7000, rec);

    assert_eq!(t.control(CMD_INSERTN, 0x7000), 0);
    assert_eq!(t.control(!CMD_INSERTN, 0x7000), 3);

    t.on();
    assert_eq!(t.control(CMD_INSERTN, 0x7000), 3);
    // bad pointer: nothing inserted, tracing stays on
    assert_eq!(t.control(CMD_INSERTN, 0xdead_0000), 0);
    assert!(t.is_tracing());

    t.flush();
    assert_eq!(t.get_count(), 6);
    assert_eq!(t.get_word(0), 0x2222);
    assert_eq!(Word0::decode(t.get_word(2)).arg, 5);
}

#[test]
fn test_insertn_bad_length_stops_tracing() {
    let t = tracer();
    t.platform().map_user(0x8000, [encode_call(0x100, 0), 0, 0, 0, 0, 0, 0, 0]);
    t.on();
    assert_eq!(t.control(CMD_INSERTN, 0x8000), 0);
    assert!(!t.is_tracing());
}

#[test]
fn test_test_and_version() {
    let t = tracer();
    assert_eq!(t.control(CMD_TEST, 0), 0);
    t.control(CMD_ON, 0);
    assert_eq!(t.control(CMD_TEST, 0), 1);
    assert_eq!(t.control(CMD_VERSION, 0), 3);
}

// =============================================================================
// Raw View and Header Tests
// =============================================================================

#[test]
fn test_raw_view_and_header() {
    let t = Tracer::new(
        MockPlatform::new(),
        TraceConfig::default().with_arena_blocks(4).with_cpus(4),
    )
    .unwrap();
    t.platform().set_time(0x1234);
    t.platform().set_cpu_id(2);
    t.platform().set_task(TaskIdentity::new(4321, "sshd"));
    t.reset(DO_IPC | DO_WRAP).unwrap();
    t.insert_1(mark(1));

    assert_eq!(t.control(CMD_GETRAWCOUNT, 0), BLOCK_WORDS as u64);
    let header = BlockHeader::decode(t.control(CMD_GETRAWWORD, 0), t.control(CMD_GETRAWWORD, 1));
    assert_eq!(header.cpu, 2);
    assert_eq!(header.timestamp, 0x1234);
    assert_eq!(header.flags, FLAG_IPC | FLAG_WRAP);

    for i in 2..8 {
        assert_eq!(t.get_raw_word(i), 0);
    }
    assert_eq!(t.get_raw_word(8), 4321);
    assert_eq!(t.get_raw_word(9), 0);
    assert_eq!(t.get_raw_word(10), u64::from_le_bytes(*b"sshd\0\0\0\0"));
    assert_eq!(t.get_raw_word(11), 0);
    assert_eq!(Word0::decode(t.get_raw_word(12)).arg, 1);
    assert_eq!(t.get_raw_word(BLOCK_WORDS as u64), 0);
    assert_eq!(t.platform().setup_calls(), vec![2]);
}

#[test]
fn test_ipc_byte_recorded() {
    let t = tracer();
    t.reset(DO_IPC).unwrap();
    t.platform().set_time(100);
    t.platform().set_inst_retired(6400);
    t.insert_1(mark(1));
    t.flush();

    // record sits at word high - B + 12: IPC word 1 of block 0, lane 4
    let ipc_word = t.control(CMD_GETIPCWORD, 1);
    assert_eq!((ipc_word >> 32) & 0xff, 8);
    assert_eq!(t.snapshot().blocks[0].ipc, vec![8]);
    assert_eq!(t.control(CMD_GETIPCWORD, (BLOCK_WORDS / 8) as u64), 0);
}

#[test]
fn test_ipc_reserves_low_blocks() {
    let t = tracer();
    t.reset(DO_IPC).unwrap();
    assert_eq!(t.arena().limit(), 4 * BLOCK_WORDS);
    t.reset(0).unwrap();
    assert_eq!(t.arena().limit(), 0);
}
