//! Internal building blocks: the Git object model used to interpret bytes read back from the
//! `git` executable (commits, tags, notes).

pub mod object;
