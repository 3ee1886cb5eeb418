use std::any::TypeId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::span;
use tracing::subscriber::Interest;
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A Layer that forwards the events to the wrapped Layer
/// only while the shared flag is set.
pub struct ToggleFilter<L> {
    layer: L,
    enabled: Arc<AtomicBool>,
}

impl<L> ToggleFilter<L> {
    pub fn new(layer: L, enabled: Arc<AtomicBool>) -> Self {
        Self { layer, enabled }
    }
}

impl<S: Subscriber, L: Layer<S>> Layer<S> for ToggleFilter<L> {
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if self.enabled.load(Ordering::Relaxed) {
            self.layer.on_event(event, ctx);
        }
    }

    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        self.layer.register_callsite(metadata)
    }

    fn enabled(&self, metadata: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        self.layer.enabled(metadata, ctx)
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_new_span(attrs, id, ctx)
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        self.layer.max_level_hint()
    }

    fn on_record(&self, span: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        self.layer.on_record(span, values, ctx)
    }

    fn on_follows_from(&self, span: &span::Id, follows: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_follows_from(span, follows, ctx)
    }

    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_enter(id, ctx)
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_exit(id, ctx)
    }

    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        self.layer.on_close(id, ctx)
    }

    fn on_id_change(&self, old: &span::Id, new: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_id_change(old, new, ctx)
    }

    unsafe fn downcast_raw(&self, id: TypeId) -> Option<*const ()> {
        if id == TypeId::of::<Self>() {
            Some(self as *const Self as *const ())
        } else {
            self.layer.downcast_raw(id)
        }
    }
}

/// A Layer that wraps another Layer and allows
/// disabling logs based on a filter function
pub struct FilteredLayer<L, F>
where
    F: 'static + Fn(&Metadata<'_>) -> bool,
{
    layer: L,
    filter: F,
}

impl<L, F: 'static + Fn(&Metadata<'_>) -> bool> FilteredLayer<L, F> {
    pub fn new(layer: L, filter: F) -> Self {
        Self { layer, filter }
    }
}

impl<S, L, F> Layer<S> for FilteredLayer<L, F>
where
    S: Subscriber,
    L: Layer<S>,
    F: 'static + Fn(&Metadata<'_>) -> bool,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if (self.filter)(event.metadata()) {
            self.layer.on_event(event, ctx);
        }
    }

    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        self.layer.register_callsite(metadata)
    }

    fn enabled(&self, metadata: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        self.layer.enabled(metadata, ctx)
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_new_span(attrs, id, ctx)
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        self.layer.max_level_hint()
    }

    fn on_record(&self, span: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        self.layer.on_record(span, values, ctx)
    }

    fn on_follows_from(&self, span: &span::Id, follows: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_follows_from(span, follows, ctx)
    }

    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_enter(id, ctx)
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_exit(id, ctx)
    }

    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        self.layer.on_close(id, ctx)
    }

    fn on_id_change(&self, old: &span::Id, new: &span::Id, ctx: Context<'_, S>) {
        self.layer.on_id_change(old, new, ctx)
    }

    unsafe fn downcast_raw(&self, id: TypeId) -> Option<*const ()> {
        if id == TypeId::of::<Self>() {
            Some(self as *const Self as *const ())
        } else {
            self.layer.downcast_raw(id)
        }
    }
}
