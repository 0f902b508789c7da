//! The two kinds of realm an app runs in.
//!
//! The runtime never executes script or lays out pages itself. It hands
//! serialized messages to a [`LogicRealm`] or a [`RenderRealm`] and receives
//! their output through [`AppService::handle_logic_message`] and
//! [`AppService::handle_render_message`].
//!
//! [`AppService::handle_logic_message`]: crate::AppService::handle_logic_message
//! [`AppService::handle_render_message`]: crate::AppService::handle_render_message

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use pocket_protocol::{FromRender, NodeId, PageId, Rect, ToLogic, ToRender};
use pocket_render::RenderSurface;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Result, RuntimeError};

/// Where a render realm sends what it produces on its own, such as query
/// replies and evaluation results.
pub type RenderOutbox = Arc<dyn Fn(FromRender) + Send + Sync>;

/// A script execution context running one app's business logic.
pub trait LogicRealm: Send + Sync {
    /// Hand a message to the realm. Must not block.
    fn deliver(&self, message: ToLogic) -> Result<()>;

    /// Forget all script state before the realm is pooled again.
    fn reset(&self);
}

/// A page renderer.
pub trait RenderRealm: Send + Sync {
    /// Hand a message to the realm. Must not block.
    fn deliver(&self, message: ToRender) -> Result<()>;

    /// True once the platform has thrown the surface away behind our back.
    fn is_reclaimed(&self) -> bool {
        false
    }

    /// Bind the surface to a page. Output the realm produces by itself goes
    /// to `outbox`.
    fn attach(&self, page: PageId, outbox: RenderOutbox) {
        let _ = (page, outbox);
    }

    /// Forget all page state before the surface is pooled again.
    fn reset(&self);
}

impl<R: RenderRealm + ?Sized> RenderRealm for Arc<R> {
    fn deliver(&self, message: ToRender) -> Result<()> {
        (**self).deliver(message)
    }

    fn is_reclaimed(&self) -> bool {
        (**self).is_reclaimed()
    }

    fn attach(&self, page: PageId, outbox: RenderOutbox) {
        (**self).attach(page, outbox)
    }

    fn reset(&self) {
        (**self).reset()
    }
}

/// Flags a render surface as reclaimed, as a memory-starved platform would.
#[derive(Debug, Clone, Default)]
pub struct Reclaimer(Arc<AtomicBool>);

impl Reclaimer {
    pub fn reclaim(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_reclaimed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One message leaving the runtime for a logic realm.
#[derive(Debug, Clone, Serialize)]
pub struct LogicTraffic {
    pub realm: Uuid,
    pub message: ToLogic,
}

/// One message leaving the runtime for a render realm.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderTraffic {
    pub realm: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_id: Option<PageId>,
    pub message: ToRender,
}

/// A logic realm whose inbox is an unbounded channel.
///
/// The script engine on the other end reads [`LogicTraffic`] and answers
/// through [`AppService::handle_logic_message`](crate::AppService::handle_logic_message).
pub struct ChannelLogicRealm {
    id: Uuid,
    tx: mpsc::UnboundedSender<LogicTraffic>,
    resets: AtomicU64,
}

impl ChannelLogicRealm {
    /// A realm plus the receiver of everything delivered to it.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<LogicTraffic>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::attached(tx), rx)
    }

    /// A realm sharing an existing inbox, told apart by [`Self::id`].
    pub fn attached(tx: mpsc::UnboundedSender<LogicTraffic>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            resets: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Times this realm was reset for reuse.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }
}

impl LogicRealm for ChannelLogicRealm {
    fn deliver(&self, message: ToLogic) -> Result<()> {
        self.tx
            .send(LogicTraffic {
                realm: self.id,
                message,
            })
            .map_err(|_| RuntimeError::RealmClosed)
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(realm = %self.id, "logic realm reset");
    }
}

/// A render realm whose inbox is an unbounded channel.
pub struct ChannelRenderRealm {
    id: Uuid,
    tx: mpsc::UnboundedSender<RenderTraffic>,
    page: Mutex<Option<PageId>>,
    reclaimer: Reclaimer,
}

impl ChannelRenderRealm {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<RenderTraffic>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::attached(tx), rx)
    }

    pub fn attached(tx: mpsc::UnboundedSender<RenderTraffic>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            page: Mutex::new(None),
            reclaimer: Reclaimer::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn reclaimer(&self) -> Reclaimer {
        self.reclaimer.clone()
    }
}

impl RenderRealm for ChannelRenderRealm {
    fn deliver(&self, message: ToRender) -> Result<()> {
        let page_id = *self.page.lock().unwrap_or_else(PoisonError::into_inner);
        self.tx
            .send(RenderTraffic {
                realm: self.id,
                page_id,
                message,
            })
            .map_err(|_| RuntimeError::RealmClosed)
    }

    fn is_reclaimed(&self) -> bool {
        self.reclaimer.is_reclaimed()
    }

    fn attach(&self, page: PageId, _outbox: RenderOutbox) {
        *self.page.lock().unwrap_or_else(PoisonError::into_inner) = Some(page);
    }

    fn reset(&self) {
        *self.page.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// An in-process render realm backed by a [`RenderSurface`].
///
/// Batches are applied as they are delivered; whatever the surface answers
/// goes to the outbox of the page it is attached to.
pub struct LocalRenderRealm {
    id: Uuid,
    surface: Mutex<RenderSurface>,
    outbox: Mutex<Option<(PageId, RenderOutbox)>>,
    tap: Option<mpsc::UnboundedSender<RenderTraffic>>,
    reclaimer: Reclaimer,
}

impl LocalRenderRealm {
    pub fn new(surface: RenderSurface) -> Self {
        Self {
            id: Uuid::new_v4(),
            surface: Mutex::new(surface),
            outbox: Mutex::new(None),
            tap: None,
            reclaimer: Reclaimer::default(),
        }
    }

    /// Mirror every delivered message to `tap` before applying it.
    pub fn with_tap(mut self, tap: mpsc::UnboundedSender<RenderTraffic>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn reclaimer(&self) -> Reclaimer {
        self.reclaimer.clone()
    }

    /// Run `f` against the surface.
    pub fn with_surface<R>(&self, f: impl FnOnce(&mut RenderSurface) -> R) -> R {
        f(&mut self.surface.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn outbox(&self) -> Option<(PageId, RenderOutbox)> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Feed the renderer's layout into the surface. Observer notifications
    /// go to the attached page like any other render output. Returns whether
    /// one was produced.
    pub fn layout(&self, viewport: Rect, boxes: &[(NodeId, Rect)]) -> Result<bool> {
        if self.reclaimer.is_reclaimed() {
            return Err(RuntimeError::RealmClosed);
        }
        let Some(report) = self.with_surface(|surface| surface.layout(viewport, boxes)) else {
            return Ok(false);
        };
        match self.outbox() {
            Some((_, outbox)) => {
                outbox(report);
                Ok(true)
            }
            None => {
                tracing::warn!(realm = %self.id, "intersection dropped, surface not attached");
                Ok(false)
            }
        }
    }
}

impl RenderRealm for LocalRenderRealm {
    fn deliver(&self, message: ToRender) -> Result<()> {
        if self.reclaimer.is_reclaimed() {
            return Err(RuntimeError::RealmClosed);
        }
        let attached = self.outbox();
        if let Some(tap) = &self.tap {
            let _ = tap.send(RenderTraffic {
                realm: self.id,
                page_id: attached.as_ref().map(|(page, _)| *page),
                message: message.clone(),
            });
        }
        let replies = self.with_surface(|surface| surface.handle(message));
        match attached {
            Some((_, outbox)) => replies.into_iter().for_each(|reply| outbox(reply)),
            None if !replies.is_empty() => {
                tracing::warn!(realm = %self.id, "render output dropped, surface not attached")
            }
            None => {}
        }
        Ok(())
    }

    fn is_reclaimed(&self) -> bool {
        self.reclaimer.is_reclaimed()
    }

    fn attach(&self, page: PageId, outbox: RenderOutbox) {
        *self.outbox.lock().unwrap_or_else(PoisonError::into_inner) = Some((page, outbox));
    }

    fn reset(&self) {
        *self.outbox.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.with_surface(RenderSurface::reset);
    }
}
