//! 会话调度器 - 编排层
//!
//! ## 职责
//!
//! 1. **立即受理**：HTTP 入口调用 `dispatch` 后立刻拿到会话 ID，预算从这一刻开始计算
//! 2. **并发控制**：使用 Semaphore 限制同时运行的链路数量
//! 3. **错误边界**：每条链路是独立的 tokio 任务，panic 只会让该会话标记为 Failed(internal)
//! 4. **状态登记**：运行中 / 已结束的会话快照都可查询，已结束的只保留最近 N 条
//! 5. **结果落盘**：链路结束后追加一行到结果文件

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::{ChainStatus, SessionSnapshot, Stage};
use crate::orchestrator::chain_driver::ChainDriver;
use crate::services::OutcomeWriter;

/// 默认保留的已结束会话数量
pub const DEFAULT_RETAINED_SESSIONS: usize = 256;

/// 会话数量统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SessionCounts {
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// 会话登记表
///
/// 运行中的会话一直保留；已结束的按结束顺序排队，超过上限时淘汰最早的
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<Uuid, SessionSnapshot>,
    finished: VecDeque<Uuid>,
}

impl SessionRegistry {
    fn insert_pending(&mut self, snapshot: SessionSnapshot) {
        self.sessions.insert(snapshot.id, snapshot);
    }

    /// 登记终态快照，返回被淘汰的会话数
    fn finish(&mut self, snapshot: SessionSnapshot, retain: usize) -> usize {
        let id = snapshot.id;
        self.sessions.insert(id, snapshot);
        self.finished.push_back(id);

        let mut evicted = 0;
        while self.finished.len() > retain {
            if let Some(old) = self.finished.pop_front() {
                self.sessions.remove(&old);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn get(&self, id: &Uuid) -> Option<&SessionSnapshot> {
        self.sessions.get(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn counts(&self) -> SessionCounts {
        let mut counts = SessionCounts::default();
        for snapshot in self.sessions.values() {
            match snapshot.status {
                ChainStatus::Succeeded => counts.succeeded += 1,
                ChainStatus::Failed { .. } => counts.failed += 1,
                ChainStatus::TimedOut => counts.timed_out += 1,
                ChainStatus::Idle | ChainStatus::Running => counts.running += 1,
            }
        }
        counts
    }
}

/// 会话调度器
#[derive(Clone)]
pub struct SessionDispatcher {
    driver: Arc<ChainDriver>,
    semaphore: Arc<Semaphore>,
    registry: Arc<RwLock<SessionRegistry>>,
    outcome_writer: Option<Arc<OutcomeWriter>>,
    retain: usize,
}

impl SessionDispatcher {
    pub fn new(driver: Arc<ChainDriver>, max_concurrent: usize) -> Self {
        Self {
            driver,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            registry: Arc::new(RwLock::new(SessionRegistry::default())),
            outcome_writer: None,
            retain: DEFAULT_RETAINED_SESSIONS,
        }
    }

    /// 链路结束后把结果追加到文件
    pub fn with_outcome_writer(mut self, writer: OutcomeWriter) -> Self {
        self.outcome_writer = Some(Arc::new(writer));
        self
    }

    /// 最多保留多少条已结束的会话快照
    pub fn with_retention(mut self, retain: usize) -> Self {
        self.retain = retain.max(1);
        self
    }

    /// 受理一条链路，立即返回会话 ID
    pub async fn dispatch(&self, start_url: String) -> Uuid {
        let accepted = Instant::now();
        let id = Uuid::new_v4();
        self.registry
            .write()
            .await
            .insert_pending(SessionSnapshot::pending(id, start_url.clone()));

        let this = self.clone();
        tokio::spawn(async move {
            let snapshot = this.run_guarded(id, start_url, accepted).await;

            if let Some(writer) = &this.outcome_writer {
                if let Err(e) = writer.write(&snapshot).await {
                    warn!("写入链路结果失败: {}", e);
                }
            }
            let evicted = this.registry.write().await.finish(snapshot, this.retain);
            if evicted > 0 {
                debug!("已淘汰 {} 条旧会话快照", evicted);
            }
        });

        id
    }

    /// 在独立任务中运行链路，panic 时转为 Failed(internal)
    async fn run_guarded(&self, id: Uuid, start_url: String, accepted: Instant) -> SessionSnapshot {
        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => return internal_failure(id, &start_url, e.to_string()),
        };

        let driver = self.driver.clone();
        let url = start_url.clone();
        let handle = tokio::spawn(async move { driver.run_since(id, &url, accepted).await });

        match handle.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("[链路 {}] 💥 后台任务异常退出: {}", id, e);
                internal_failure(id, &start_url, e.to_string())
            }
        }
    }

    /// 查询单个会话
    pub async fn snapshot(&self, id: &Uuid) -> Option<SessionSnapshot> {
        self.registry.read().await.get(id).cloned()
    }

    /// 统计各状态的会话数量
    pub async fn counts(&self) -> SessionCounts {
        self.registry.read().await.counts()
    }
}

fn internal_failure(id: Uuid, start_url: &str, reason: String) -> SessionSnapshot {
    let mut snapshot = SessionSnapshot::pending(id, start_url);
    snapshot.status = ChainStatus::failed(Stage::Internal, reason);
    snapshot.finished_at = Some(chrono::Local::now());
    snapshot
}
