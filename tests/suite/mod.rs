mod approvals;
mod checkpoints;
mod streaming;
