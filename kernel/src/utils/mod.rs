// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Small self-contained helpers used across the kernel.

pub mod matcher;
pub mod path;
pub mod queue;
