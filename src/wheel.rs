use crate::task::CompletionNotifier;
use crate::timeout::{TimeoutShared, NO_SLOT};
use crate::worker::Registration;
use crate::TimerTask;
use slab::Slab;
use smallvec::SmallVec;
use std::sync::Arc;

/// 链表哨兵值：不指向任何槽位
const NIL: usize = NO_SLOT;

/// 时间轮中的一个超时条目
///
/// 条目存放在统一的 slab 内存池中，`prev`/`next` 是 slab 索引而不是
/// 指针，构成每个桶内的侵入式双向链表。条目持有任务与完成通知器的
/// 所有权；从 slab 中移除时所有权随条目一起返回给 worker。
pub(crate) struct TimeoutEntry {
    /// 与超时句柄共享的状态
    pub(crate) shared: Arc<TimeoutShared>,
    /// 用户任务
    pub(crate) task: Box<dyn TimerTask>,
    /// 完成通知发送端
    pub(crate) notifier: CompletionNotifier,
    /// 到期前剩余的完整轮数
    remaining_rounds: u64,
    /// 所在桶的索引（非所有权回引，仅用于 O(1) 摘除）
    bucket: usize,
    /// 桶内链表的前驱（slab 索引）
    prev: usize,
    /// 桶内链表的后继（slab 索引）
    next: usize,
}

/// 时间轮的一个槽位：桶内链表的头尾索引
#[derive(Clone, Copy)]
struct Bucket {
    head: usize,
    tail: usize,
}

impl Bucket {
    const EMPTY: Bucket = Bucket {
        head: NIL,
        tail: NIL,
    };
}

/// 时间轮数据结构
///
/// 固定大小的环形桶数组，桶数量为 2 的幂次方，用位掩码完成取模。
/// 所有条目存放在一个 slab 内存池中，每个桶维护一条侵入式双向链表。
/// 整个结构只被 worker 线程访问，不需要任何同步。
pub(crate) struct Wheel {
    /// 槽位数组
    buckets: Vec<Bucket>,
    /// 条目内存池，桶内链表的存储后端
    entries: Slab<TimeoutEntry>,

    /// 槽位索引掩码（桶数量 - 1）
    mask: u64,

    /// 每个 tick 的纳秒数
    tick_duration_ns: u64,
}

impl Wheel {
    /// 创建新的时间轮
    ///
    /// # 参数
    /// - `wheel_size`: 槽位数量（已归一化为 2 的幂次方）
    /// - `tick_duration_ns`: 每个 tick 的纳秒数
    ///
    /// # 注意
    /// 参数已在 `WheelConfig::validate()` 中验证，此方法不会失败。
    pub(crate) fn new(wheel_size: usize, tick_duration_ns: u64) -> Self {
        debug_assert!(wheel_size.is_power_of_two());
        debug_assert!(tick_duration_ns > 0);

        Self {
            buckets: vec![Bucket::EMPTY; wheel_size],
            entries: Slab::new(),
            mask: (wheel_size - 1) as u64,
            tick_duration_ns,
        }
    }

    /// 当前存放的条目数量
    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// 把一个注册请求放入目标桶
    ///
    /// 目标槽位为 `max(deadline / tick_duration, current_tick) & mask`：
    /// 截止时间已经过去的任务落入当前 tick 的桶，在同一个 tick 内到期。
    /// 剩余轮数为到期 tick 与当前 tick 之间相差的完整轮数。
    /// 追加到桶的尾部，保证同一桶内按插入顺序（FIFO）到期。
    pub(crate) fn add_timeout(&mut self, current_tick: u64, reg: Registration) {
        let deadline_ticks = reg.shared.deadline_ns() / self.tick_duration_ns;
        let remaining_rounds = if deadline_ticks > current_tick {
            (deadline_ticks - current_tick) / self.buckets.len() as u64
        } else {
            0
        };
        let bucket_idx = (deadline_ticks.max(current_tick) & self.mask) as usize;

        let tail = self.buckets[bucket_idx].tail;
        let key = self.entries.insert(TimeoutEntry {
            shared: reg.shared,
            task: reg.task,
            notifier: reg.notifier,
            remaining_rounds,
            bucket: bucket_idx,
            prev: tail,
            next: NIL,
        });

        let bucket = &mut self.buckets[bucket_idx];
        if bucket.tail == NIL {
            bucket.head = key;
        } else {
            self.entries[tail].next = key;
        }
        bucket.tail = key;

        self.entries[key].shared.set_wheel_slot(key);
    }

    /// 摘除一个已取消的条目
    ///
    /// # 返回
    /// 条目仍在桶中返回 `Some`（所有权交还调用方）；已经被到期处理
    /// 或重复摘除返回 `None`。
    pub(crate) fn remove_cancelled(&mut self, shared: &Arc<TimeoutShared>) -> Option<TimeoutEntry> {
        let key = shared.wheel_slot();
        if key == NO_SLOT {
            return None;
        }

        // 槽位可能已被后续条目复用，按任务 ID 校验
        match self.entries.get(key) {
            Some(entry) if entry.shared.id() == shared.id() => Some(self.unlink_remove(key)),
            _ => None,
        }
    }

    /// 处理当前 tick 对应桶的到期
    ///
    /// # 参数
    /// - `tick`: 当前 tick 编号
    /// - `tick_deadline_ns`: 当前 tick 的绝对截止时间（纳秒）
    ///
    /// # 返回
    /// 本轮从桶中摘除的全部条目（到期的和已取消的），按桶内插入顺序
    /// 排列；剩余轮数大于 0 的条目留在原位并递减轮数。
    ///
    /// # Panics
    /// 剩余轮数为 0 的条目的截止时间晚于当前 tick 的截止时间，说明
    /// 调度算法把它放进了错误的槽位。这是内部逻辑错误而不是调用方
    /// 输入问题，直接 panic，没有恢复路径。
    pub(crate) fn expire_timeouts(
        &mut self,
        tick: u64,
        tick_deadline_ns: u64,
    ) -> SmallVec<[TimeoutEntry; 8]> {
        let bucket_idx = (tick & self.mask) as usize;
        let mut removed = SmallVec::new();

        let mut cur = self.buckets[bucket_idx].head;
        while cur != NIL {
            let next = self.entries[cur].next;

            if self.entries[cur].remaining_rounds == 0 {
                let deadline_ns = self.entries[cur].shared.deadline_ns();
                assert!(
                    deadline_ns <= tick_deadline_ns,
                    "时间轮内部不变量被破坏: 条目截止时间 {} ns 晚于 tick {} 的截止时间 {} ns",
                    deadline_ns,
                    tick,
                    tick_deadline_ns,
                );
                removed.push(self.unlink_remove(cur));
            } else if self.entries[cur].shared.is_cancelled() {
                removed.push(self.unlink_remove(cur));
            } else {
                self.entries[cur].remaining_rounds -= 1;
            }

            cur = next;
        }

        removed
    }

    /// 清空所有桶，把剩余条目交给调用方
    ///
    /// 仅在关闭流程中由 worker 调用。
    pub(crate) fn clear_timeouts(&mut self, out: &mut Vec<TimeoutEntry>) {
        for idx in 0..self.buckets.len() {
            loop {
                let head = self.buckets[idx].head;
                if head == NIL {
                    break;
                }
                out.push(self.unlink_remove(head));
            }
        }
    }

    /// 从链表和 slab 中摘除条目，O(1)
    ///
    /// 对头、尾和中间节点都保持链表完整性。
    fn unlink_remove(&mut self, key: usize) -> TimeoutEntry {
        let entry = self.entries.remove(key);

        if entry.prev != NIL {
            self.entries[entry.prev].next = entry.next;
        } else {
            self.buckets[entry.bucket].head = entry.next;
        }

        if entry.next != NIL {
            self.entries[entry.next].prev = entry.prev;
        } else {
            self.buckets[entry.bucket].tail = entry.prev;
        }

        entry.shared.clear_wheel_slot();
        entry
    }
}
