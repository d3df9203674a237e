use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic;

use once_cell::sync::OnceCell;

static HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Chains a panic hook that records the panic-site backtrace for the
/// panicking thread. Installed once per process.
pub(super) fn install_backtrace_hook() {
    HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            LAST_BACKTRACE.with(|slot| {
                *slot.borrow_mut() = Some(Backtrace::force_capture());
            });
            previous(info);
        }));
    });
}

/// Takes the backtrace recorded by the most recent panic on this thread.
///
/// The unwind reaches the dispatch boundary within the same poll, so the
/// thread that panicked is the thread that catches.
pub(super) fn take_backtrace() -> Option<Backtrace> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

pub(super) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&'static str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
