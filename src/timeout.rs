//! 超时句柄与状态机
//!
//! 每个被调度的任务对应一个 [`Timeout`] 句柄。状态机使用原子整数编码，
//! 所有跨线程转换都通过 compare-exchange 完成，保证取消与到期的竞争
//! 恰好有一个胜者。

use crate::task::{CompletionReceiver, TaskId};
use crate::worker::{PendingOp, TimerCore};
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// 初始状态：已创建，尚未被 worker 放入桶中
pub(crate) const ST_INIT: u8 = 0;
/// 已由 worker 放入某个桶的链表
pub(crate) const ST_IN_BUCKET: u8 = 1;
/// 已取消（终态）；任务保证不会被执行
pub(crate) const ST_CANCELLED: u8 = 2;
/// 已到期（终态）；任务恰好被执行一次
pub(crate) const ST_EXPIRED: u8 = 3;

/// 不在任何槽位中的哨兵值
pub(crate) const NO_SLOT: usize = usize::MAX;

fn state_name(state: u8) -> &'static str {
    match state {
        ST_INIT => "init",
        ST_IN_BUCKET => "in-bucket",
        ST_CANCELLED => "cancelled",
        ST_EXPIRED => "expired",
        _ => "unknown",
    }
}

/// 超时句柄与 worker 之间共享的状态
pub(crate) struct TimeoutShared {
    /// 任务 ID
    id: TaskId,
    /// 绝对截止时间（自定时器启动时刻起的纳秒数），创建后不可变
    deadline_ns: u64,
    /// 状态机
    state: AtomicU8,
    /// 在 slab 中的槽位索引（仅 worker 读写，[`NO_SLOT`] 表示不在桶中）
    wheel_slot: AtomicUsize,
    /// 所属定时器核心的弱引用，用于取消时重新入队
    core: Weak<TimerCore>,
}

impl TimeoutShared {
    pub(crate) fn new(id: TaskId, deadline_ns: u64, core: Weak<TimerCore>) -> Self {
        Self {
            id,
            deadline_ns,
            state: AtomicU8::new(ST_INIT),
            wheel_slot: AtomicUsize::new(NO_SLOT),
            core,
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn deadline_ns(&self) -> u64 {
        self.deadline_ns
    }

    pub(crate) fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state() == ST_CANCELLED
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.state() == ST_EXPIRED
    }

    /// 尝试状态转换，成功返回 true
    pub(crate) fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 记录在 slab 中的槽位（仅 worker 调用）
    pub(crate) fn set_wheel_slot(&self, slot: usize) {
        self.wheel_slot.store(slot, Ordering::Release);
    }

    /// 清除槽位记录（仅 worker 调用）
    pub(crate) fn clear_wheel_slot(&self) {
        self.wheel_slot.store(NO_SLOT, Ordering::Release);
    }

    pub(crate) fn wheel_slot(&self) -> usize {
        self.wheel_slot.load(Ordering::Acquire)
    }
}

/// 超时句柄
///
/// 表示一个已调度的一次性任务。句柄可以克隆并跨线程传递；
/// 所有克隆共享同一个状态机。
///
/// # 取消语义
/// [`Timeout::cancel`] 的效果是立即的：原子状态转换保证被取消的任务
/// 一定不会执行，即使与到期处理并发竞争。从时间轮链表中的实际摘除
/// 则推迟到 worker 下一次处理待定队列时进行（只有 worker 会修改
/// 桶的链表）。
#[derive(Clone)]
pub struct Timeout {
    pub(crate) inner: Arc<TimeoutShared>,
}

impl Timeout {
    pub(crate) fn from_shared(inner: Arc<TimeoutShared>) -> Self {
        Self { inner }
    }

    /// 获取任务 ID
    pub fn task_id(&self) -> TaskId {
        self.inner.id()
    }

    /// 绝对截止时间（自定时器启动时刻起）
    pub fn deadline(&self) -> Duration {
        Duration::from_nanos(self.inner.deadline_ns())
    }

    /// 任务是否已到期执行
    pub fn is_expired(&self) -> bool {
        self.inner.is_expired()
    }

    /// 任务是否已被取消
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// 取消超时任务
    ///
    /// # 返回
    /// 本次调用完成了逻辑取消返回 true；任务已经取消或已经到期
    /// 返回 false（幂等，重复调用不是错误）。
    ///
    /// # 实现细节
    /// - 尚未入桶（INIT）：直接转换为 CANCELLED，worker 之后从待定
    ///   队列弹出注册请求时静默丢弃。
    /// - 已入桶（IN_BUCKET）：转换为 CANCELLED 后把句柄重新放入待定
    ///   队列，由 worker 在后续 tick 中完成 O(1) 摘除。
    pub fn cancel(&self) -> bool {
        if self.inner.transition(ST_INIT, ST_CANCELLED) {
            return true;
        }

        if self.inner.transition(ST_IN_BUCKET, ST_CANCELLED) {
            if let Some(core) = self.inner.core.upgrade() {
                core.submit(PendingOp::Cancel(Arc::clone(&self.inner)));
            }
            return true;
        }

        false
    }
}

impl fmt::Debug for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout")
            .field("task_id", &self.inner.id())
            .field("deadline", &Duration::from_nanos(self.inner.deadline_ns()))
            .field("state", &state_name(self.inner.state()))
            .finish()
    }
}

/// 定时器句柄，绑定超时句柄与完成通知接收端
///
/// 由 [`crate::TimerWheel::new_timeout`] 返回。句柄本身不影响任务的
/// 生命周期：丢弃句柄不会取消任务。
pub struct TimerHandle {
    timeout: Timeout,
    completion_rx: CompletionReceiver,
}

impl TimerHandle {
    pub(crate) fn new(timeout: Timeout, completion_rx: CompletionReceiver) -> Self {
        Self {
            timeout,
            completion_rx,
        }
    }

    /// 获取任务 ID
    pub fn task_id(&self) -> TaskId {
        self.timeout.task_id()
    }

    /// 获取超时句柄的克隆
    pub fn timeout(&self) -> Timeout {
        self.timeout.clone()
    }

    /// 取消超时任务
    pub fn cancel(&self) -> bool {
        self.timeout.cancel()
    }

    /// 任务是否已到期执行
    pub fn is_expired(&self) -> bool {
        self.timeout.is_expired()
    }

    /// 任务是否已被取消
    pub fn is_cancelled(&self) -> bool {
        self.timeout.is_cancelled()
    }

    /// 转移完成通知接收端的所有权
    pub fn into_completion_receiver(self) -> CompletionReceiver {
        self.completion_rx
    }

    /// 拆分为超时句柄与完成通知接收端
    pub fn into_parts(self) -> (Timeout, CompletionReceiver) {
        (self.timeout, self.completion_rx)
    }
}
