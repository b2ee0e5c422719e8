//! 레지스트리 세션 — 오케스트레이터를 단일 tokio 태스크에서 구동
//!
//! ## 아키텍처
//! - 명령은 `mpsc` 채널로, 전송 완료는 `Completion` 채널로 같은 루프에 도착
//! - 오케스트레이터 이벤트는 `broadcast`로 구독자에게 전달 (밀리면 유실 가능)
//! - 붙어있는 `RegistryView`에는 무손실 채널(`watch`)로 전달
//! - 카탈로그/엔트리 목록에 대한 공유 상태 접근은 없음 (루프만 소유)

use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{FailureReport, RegistryError};
use crate::orchestrator::{CompletionReceiver, LifecycleOrchestrator, RegistryEvent};
use crate::state::{PluginEntryState, RegistrySnapshot, RegistryState};

/// UI 협력자 콜백. 세션 루프 위에서 호출됨
pub trait RegistryView: Send {
    fn on_state_changed(&mut self, state: &RegistryState);
    fn on_entry_changed(&mut self, id: &str, state: &PluginEntryState);
    fn on_failure(&mut self, _report: &FailureReport) {}
}

/// 업데이트 알림 협력자에게 넘길 엔드포인트
#[derive(Debug, Clone)]
pub struct UpdateCheck {
    pub version_url: String,
    pub site_url: String,
}

type Reply<T> = oneshot::Sender<Result<T, RegistryError>>;

enum SessionCommand {
    Attach {
        view: Box<dyn RegistryView>,
        reply: oneshot::Sender<()>,
    },
    Detach {
        reply: oneshot::Sender<()>,
    },
    Open,
    Refresh,
    Install { id: String, reply: Reply<()> },
    Update { id: String, reply: Reply<()> },
    Uninstall { id: String, reply: Reply<PathBuf> },
    Restore { id: String, reply: Reply<PathBuf> },
    Snapshot { reply: oneshot::Sender<RegistrySnapshot> },
    Shutdown,
}

pub struct RegistrySession {
    cmd_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<RegistryEvent>,
    handle: JoinHandle<()>,
}

impl RegistrySession {
    /// 세션 루프 스폰
    pub fn spawn(
        mut orchestrator: LifecycleOrchestrator,
        completions: CompletionReceiver,
        update_check: Option<UpdateCheck>,
    ) -> Self {
        if let Some(check) = &update_check {
            tracing::info!(
                "[Session] Registering update check ({} / {})",
                check.version_url,
                check.site_url
            );
            orchestrator
                .index()
                .host()
                .register_update_check(&check.version_url, &check.site_url);
        }

        let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(32);
        let event_tx = orchestrator.event_sender();
        let view_rx = orchestrator.watch();

        let handle = tokio::spawn(async move {
            session_loop(orchestrator, completions, cmd_rx, view_rx).await;
        });

        Self {
            cmd_tx,
            event_tx,
            handle,
        }
    }

    async fn submit(&self, cmd: SessionCommand) -> Result<(), RegistryError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| RegistryError::SessionClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.submit(make(reply)).await?;
        rx.await.map_err(|_| RegistryError::SessionClosed)?
    }

    /// 이벤트 구독
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    /// 뷰를 붙이고 조정을 시작 (페이지 열림)
    pub async fn attach(&self, view: Box<dyn RegistryView>) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.submit(SessionCommand::Attach { view, reply }).await?;
        rx.await.map_err(|_| RegistryError::SessionClosed)
    }

    pub async fn detach(&self) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.submit(SessionCommand::Detach { reply }).await?;
        rx.await.map_err(|_| RegistryError::SessionClosed)
    }

    pub async fn open(&self) -> Result<(), RegistryError> {
        self.submit(SessionCommand::Open).await
    }

    pub async fn refresh(&self) -> Result<(), RegistryError> {
        self.submit(SessionCommand::Refresh).await
    }

    /// 설치 시작. 완료/실패는 이벤트로 통지됨
    pub async fn install(&self, id: &str) -> Result<(), RegistryError> {
        let id = id.to_string();
        self.request(|reply| SessionCommand::Install { id, reply }).await
    }

    pub async fn update(&self, id: &str) -> Result<(), RegistryError> {
        let id = id.to_string();
        self.request(|reply| SessionCommand::Update { id, reply }).await
    }

    /// 격리된 경로 반환
    pub async fn uninstall(&self, id: &str) -> Result<PathBuf, RegistryError> {
        let id = id.to_string();
        self.request(|reply| SessionCommand::Uninstall { id, reply }).await
    }

    /// 복원된 경로 반환
    pub async fn restore(&self, id: &str) -> Result<PathBuf, RegistryError> {
        let id = id.to_string();
        self.request(|reply| SessionCommand::Restore { id, reply }).await
    }

    pub async fn snapshot(&self) -> Result<RegistrySnapshot, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.submit(SessionCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| RegistryError::SessionClosed)
    }

    /// 진행 중인 전송이 끝날 때까지 기다린 뒤 루프 종료
    pub async fn shutdown(self) -> Result<(), RegistryError> {
        self.submit(SessionCommand::Shutdown).await?;
        self.handle
            .await
            .map_err(|_| RegistryError::SessionClosed)
    }
}

/// 세션 메인 루프
async fn session_loop(
    mut orchestrator: LifecycleOrchestrator,
    mut completions: CompletionReceiver,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    mut view_rx: mpsc::UnboundedReceiver<RegistryEvent>,
) {
    tracing::info!("[Session] Registry session started");
    let mut view: Option<Box<dyn RegistryView>> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let cmd = match cmd {
                    Some(cmd) => cmd,
                    None => break,
                };
                if matches!(cmd, SessionCommand::Shutdown) {
                    tracing::info!("[Session] Shutdown requested");
                    drain_transfers(&mut orchestrator, &mut completions, &mut view_rx, &mut view).await;
                    break;
                }
                handle_command(&mut orchestrator, &mut view, cmd);
            }
            Some(completion) = completions.recv() => {
                orchestrator.handle_completion(completion);
            }
        }
        dispatch_to_view(&mut view_rx, &mut view);
    }

    dispatch_to_view(&mut view_rx, &mut view);
    tracing::info!("[Session] Registry session stopped");
}

fn handle_command(
    orchestrator: &mut LifecycleOrchestrator,
    view: &mut Option<Box<dyn RegistryView>>,
    cmd: SessionCommand,
) {
    match cmd {
        SessionCommand::Attach { view: new_view, reply } => {
            tracing::debug!("[Session] View attached");
            *view = Some(new_view);
            let _ = reply.send(());
            orchestrator.open();
        }
        SessionCommand::Detach { reply } => {
            tracing::debug!("[Session] View detached");
            *view = None;
            let _ = reply.send(());
        }
        SessionCommand::Open => orchestrator.open(),
        SessionCommand::Refresh => orchestrator.refresh(),
        SessionCommand::Install { id, reply } => {
            let _ = reply.send(orchestrator.start_install(&id));
        }
        SessionCommand::Update { id, reply } => {
            let _ = reply.send(orchestrator.start_update(&id));
        }
        SessionCommand::Uninstall { id, reply } => {
            let _ = reply.send(orchestrator.uninstall(&id));
        }
        SessionCommand::Restore { id, reply } => {
            let _ = reply.send(orchestrator.restore(&id));
        }
        SessionCommand::Snapshot { reply } => {
            let _ = reply.send(orchestrator.snapshot());
        }
        SessionCommand::Shutdown => {}
    }
}

/// 취소는 정의되어 있지 않으므로 모든 전송을 완료/실패까지 처리
async fn drain_transfers(
    orchestrator: &mut LifecycleOrchestrator,
    completions: &mut CompletionReceiver,
    view_rx: &mut mpsc::UnboundedReceiver<RegistryEvent>,
    view: &mut Option<Box<dyn RegistryView>>,
) {
    while orchestrator.has_pending_transfers() {
        match completions.recv().await {
            Some(completion) => orchestrator.handle_completion(completion),
            None => break,
        }
        dispatch_to_view(view_rx, view);
    }
}

/// 쌓인 이벤트를 모두 뷰로 전달. 뷰가 없으면 버림
fn dispatch_to_view(
    rx: &mut mpsc::UnboundedReceiver<RegistryEvent>,
    view: &mut Option<Box<dyn RegistryView>>,
) {
    while let Ok(event) = rx.try_recv() {
        let Some(view) = view.as_mut() else {
            continue;
        };
        match &event {
            RegistryEvent::StateChanged { state } => view.on_state_changed(state),
            RegistryEvent::EntryChanged { id, state } => view.on_entry_changed(id, state),
            RegistryEvent::OperationFailed { report } => view.on_failure(report),
            RegistryEvent::OperationFinished { .. } | RegistryEvent::Notice { .. } => {}
        }
    }
}
