use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

type Producer<T> = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = T> + Send>> + Send + Sync>;

struct BatchState<T> {
    deadline: Option<Instant>,
    waiters: Vec<oneshot::Sender<T>>,
}

/// Collapses bursts of calls into a single run of the wrapped producer.
///
/// Every call made while a batch is open joins that batch and settles with
/// a clone of the one result; a call arriving before the wait window closes
/// pushes the deadline back (trailing-edge debounce). Designed to be called
/// freely from event handlers without caller-side coordination.
#[derive(Clone)]
pub struct Debouncer<T> {
    wait: Duration,
    producer: Producer<T>,
    state: Arc<Mutex<BatchState<T>>>,
}

impl<T> Debouncer<T>
where
    T: Clone + Send + 'static,
{
    pub fn new<F, Fut>(wait: Duration, producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            wait,
            producer: Arc::new(move || Box::pin(producer()) as Pin<Box<dyn Future<Output = T> + Send>>),
            state: Arc::new(Mutex::new(BatchState {
                deadline: None,
                waiters: Vec::new(),
            })),
        }
    }

    /// Joins the current batch (opening one if none is pending) and resolves
    /// once the collapsed invocation settles.
    pub async fn invoke(&self) -> T {
        let (tx, rx) = oneshot::channel();
        let start_driver = {
            let mut state = lock_state(&self.state);
            state.waiters.push(tx);
            state.deadline = Some(Instant::now() + self.wait);
            state.waiters.len() == 1
        };
        if start_driver {
            let state = Arc::clone(&self.state);
            let producer = Arc::clone(&self.producer);
            tokio::spawn(drive_batch(state, producer));
        }
        match rx.await {
            Ok(value) => value,
            // The driver only drops senders if the producer future panicked;
            // rerun it directly so the caller still gets an answer.
            Err(_) => (self.producer)().await,
        }
    }

    /// Number of callers waiting on the open batch. Test hook.
    #[cfg(test)]
    fn pending(&self) -> usize {
        lock_state(&self.state).waiters.len()
    }
}

fn lock_state<T>(state: &Mutex<BatchState<T>>) -> std::sync::MutexGuard<'_, BatchState<T>> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn drive_batch<T>(state: Arc<Mutex<BatchState<T>>>, producer: Producer<T>)
where
    T: Clone + Send + 'static,
{
    // Sleep until the deadline stops moving; each new caller pushes it back.
    loop {
        let deadline = {
            let state = lock_state(&state);
            state.deadline
        };
        let Some(deadline) = deadline else { return };
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep_until(deadline).await;
    }

    let waiters = {
        let mut state = lock_state(&state);
        state.deadline = None;
        std::mem::take(&mut state.waiters)
    };
    if waiters.is_empty() {
        return;
    }

    let result = producer().await;
    for waiter in waiters {
        // A caller that went away is not an error.
        let _ = waiter.send(result.clone());
    }
}
