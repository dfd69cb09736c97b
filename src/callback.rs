use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

/// Scheduler Callback Trait
///
/// Types implementing this trait can be scheduled through the coalescer.
///
/// 可实现此特性的类型可以通过合并调度器进行调度。
///
/// # Examples (示例)
///
/// ```
/// use kestrel_coalesce::callback::SchedulerCallback;
/// use std::future::Future;
/// use std::pin::Pin;
///
/// struct MyCallback;
///
/// impl SchedulerCallback for MyCallback {
///     fn call(&self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
///         Box::pin(async {
///             println!("Callback executed!");
///         })
///     }
/// }
/// ```
pub trait SchedulerCallback: Send + Sync + 'static {
    /// Execute callback, returns a Future
    ///
    /// 执行回调函数，返回一个 Future
    fn call(&self) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Implement SchedulerCallback trait for closures
///
/// Supports Fn() -> Future closures, can be called multiple times, suitable for
/// interval groups where the same slot fires every period
///
/// 为闭包实现 SchedulerCallback 特性，支持 Fn() -> Future 闭包，可以多次调用，
/// 适合每个周期都触发同一槽位的周期组
impl<F, Fut> SchedulerCallback for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(self())
    }
}

/// Callback wrapper for standardized callback creation and management
///
/// Callback 包装器，用于标准化回调创建和管理
///
/// # Examples (示例)
///
/// ```
/// use kestrel_coalesce::CallbackWrapper;
///
/// let callback = CallbackWrapper::new(|| async {
///     println!("Callback executed!");
/// });
/// ```
#[derive(Clone)]
pub struct CallbackWrapper {
    callback: Arc<dyn SchedulerCallback>,
}

impl CallbackWrapper {
    /// Create a new callback wrapper
    ///
    /// # Parameters
    /// - `callback`: Callback object implementing SchedulerCallback trait
    ///
    /// 创建一个新的回调包装器
    ///
    /// # 参数
    /// - `callback`: 实现 SchedulerCallback 特性的回调对象
    #[inline]
    pub fn new(callback: impl SchedulerCallback) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Call the callback function
    ///
    /// 调用回调函数
    #[inline]
    pub(crate) fn call(&self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.callback.call()
    }
}

/// Run a callback with per-callback panic isolation
///
/// One panicking callback must never suppress the delivery of its sibling
/// callbacks in the same group or batch firing. Returns false when the
/// callback panicked.
///
/// 以回调级 panic 隔离执行回调。同一组或批次触发中，一个回调 panic 绝不能
/// 阻止兄弟回调的执行。回调 panic 时返回 false。
pub(crate) async fn run_isolated(callback: &CallbackWrapper) -> bool {
    match AssertUnwindSafe(callback.call()).catch_unwind().await {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!("scheduled callback panicked; continuing with remaining callbacks");
            false
        }
    }
}
