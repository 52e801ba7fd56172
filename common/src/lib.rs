pub mod group;
pub mod job;
pub mod merge;
pub mod record;
pub mod sorter;
pub mod storage;
pub mod task;
pub mod workload;

pub use group::{GroupValues, Grouper};
pub use job::{JobId, JobInfo, JobRequest, Phase};
pub use merge::{FileRecordReader, MergeIter, RecordSource, VecSource};
pub use record::{lexical_cmp, KeyCmp, Record};
pub use sorter::{partition_for, SortPartitionEngine};
pub use storage::{LocalStorage, Storage};
pub use task::{
    partition_file, reduce_output_file, TaskDescriptor, TaskId, TaskOutcome,
    TaskStatus, TaskType,
};
pub use workload::{lookup as lookup_workload, Mapper, Reducer, Workload};
