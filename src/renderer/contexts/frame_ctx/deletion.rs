use crate::renderer::config::MAX_FRAMES_IN_FLIGHT;
use crate::renderer::contexts::frame_ctx::frame::FrameContext;
use crate::renderer::error::CoreError;

struct DeletionTask {
    task: Box<dyn FnOnce()>,
    frame_ring_index: usize,
}

/// Defers destruction of frame-indexed resources until the GPU can no longer reference them.
///
/// A task tagged with ring index `k` runs on the next [`DeletionTasks::tick`] whose frame
/// has ring index `k` again. That tick happens right after the fence wait for slot `k`,
/// which proves every command buffer recorded while the task was queued has retired.
#[derive(Default)]
pub struct DeletionTasks {
    tasks: Vec<DeletionTask>,
}

impl DeletionTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `task` against the ring slot of the frame currently being recorded.
    pub fn add_deletion_task(&mut self, task: impl FnOnce() + 'static, frame: &FrameContext) {
        self.tasks.push(DeletionTask {
            task: Box::new(task),
            frame_ring_index: frame.frame_ring_index(),
        });
    }

    /// Keeps `resource` alive until `frame`'s ring slot comes around again, then drops it.
    pub fn retire<T: 'static>(&mut self, resource: T, frame: &FrameContext) {
        self.add_deletion_task(move || drop(resource), frame);
    }

    pub fn add_deletion_task_at(
        &mut self,
        task: impl FnOnce() + 'static,
        frame_ring_index: usize,
    ) -> Result<(), CoreError> {
        if frame_ring_index >= MAX_FRAMES_IN_FLIGHT {
            return Err(CoreError::FrameRingIndexOutOfRange {
                index: frame_ring_index,
                max: MAX_FRAMES_IN_FLIGHT,
            });
        }

        self.tasks.push(DeletionTask {
            task: Box::new(task),
            frame_ring_index,
        });
        Ok(())
    }

    /// Must be called once per frame after waiting on the fence of `frame`'s ring slot
    /// and before anything is queued for that frame. Returns the number of tasks executed.
    pub fn tick(&mut self, frame: &FrameContext) -> usize {
        let ring_index = frame.frame_ring_index();
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| task.frame_ring_index == ring_index);
        self.tasks = pending;

        let executed = ready.len();
        for task in ready {
            (task.task)();
        }

        if executed > 0 {
            log::trace!("Ran {} deletion task(s) for ring slot {}", executed, ring_index);
        }
        executed
    }

    /// Runs every pending task regardless of its ring slot. Only valid once the device is idle.
    pub fn flush(&mut self) {
        for task in std::mem::take(&mut self.tasks) {
            (task.task)();
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for DeletionTasks {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            log::warn!(
                "Dropping DeletionTasks with {} pending task(s); flushing",
                self.tasks.len()
            );
            self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn frame(ring_index: usize) -> FrameContext {
        FrameContext::new(0.0, 0.016, ring_index, 0).unwrap()
    }

    fn counter() -> (Rc<Cell<u32>>, impl FnOnce() + 'static) {
        let count = Rc::new(Cell::new(0));
        let task_count = count.clone();
        (count, move || task_count.set(task_count.get() + 1))
    }

    #[test]
    fn task_fires_only_when_ring_index_cycles_back() {
        let mut tasks = DeletionTasks::new();
        let (count, task) = counter();
        tasks.add_deletion_task(task, &frame(1));

        assert_eq!(tasks.tick(&frame(2)), 0);
        assert_eq!(count.get(), 0);
        assert_eq!(tasks.tick(&frame(0)), 0);
        assert_eq!(count.get(), 0);
        assert_eq!(tasks.tick(&frame(1)), 1);
        assert_eq!(count.get(), 1);

        // Executed tasks are removed, so the next cycle runs nothing.
        for ring_index in [2, 0, 1] {
            tasks.tick(&frame(ring_index));
        }
        assert_eq!(count.get(), 1);
        assert!(tasks.is_empty());
    }

    #[test]
    fn tasks_in_other_slots_stay_queued() {
        let mut tasks = DeletionTasks::new();
        let (first, first_task) = counter();
        let (second, second_task) = counter();
        tasks.add_deletion_task_at(first_task, 0).unwrap();
        tasks.add_deletion_task_at(second_task, 2).unwrap();

        tasks.tick(&frame(0));
        assert_eq!((first.get(), second.get()), (1, 0));
        assert_eq!(tasks.len(), 1);

        tasks.tick(&frame(2));
        assert_eq!((first.get(), second.get()), (1, 1));
    }

    #[test]
    fn flush_runs_everything_once() {
        let mut tasks = DeletionTasks::new();
        let (count, task) = counter();
        let (other, other_task) = counter();
        tasks.add_deletion_task(task, &frame(0));
        tasks.add_deletion_task(other_task, &frame(2));

        tasks.flush();
        tasks.flush();
        assert_eq!((count.get(), other.get()), (1, 1));
    }

    #[test]
    fn drop_flushes_pending_tasks() {
        let (count, task) = counter();
        {
            let mut tasks = DeletionTasks::new();
            tasks.add_deletion_task(task, &frame(1));
        }
        assert_eq!(count.get(), 1);
    }

    struct DropCounter(Rc<Cell<u32>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn retired_resource_outlives_frames_in_flight() {
        let mut tasks = DeletionTasks::new();
        let drops = Rc::new(Cell::new(0));
        tasks.retire(DropCounter(drops.clone()), &frame(0));
        assert_eq!(drops.get(), 0);

        tasks.tick(&frame(1));
        tasks.tick(&frame(2));
        assert_eq!(drops.get(), 0);

        tasks.tick(&frame(0));
        assert_eq!(drops.get(), 1);
        assert!(tasks.is_empty());
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let mut tasks = DeletionTasks::new();
        let err = tasks
            .add_deletion_task_at(|| {}, MAX_FRAMES_IN_FLIGHT)
            .unwrap_err();
        assert!(matches!(err, CoreError::FrameRingIndexOutOfRange { .. }));
        assert!(tasks.is_empty());
    }
}
