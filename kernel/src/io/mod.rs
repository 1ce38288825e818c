// Copyright 2025 The Ember Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Input and output: the typed device registry, byte streams, the
//! console layer, and disks.
//!
//! The [`device`] registry is the directory everything else
//! composes through: physical disks publish themselves there, disk
//! discovery turns their partitions into logical disks there, and
//! consumers look devices up by type tag. [`stream`] is the byte
//! transport abstraction shared by consoles and ports; [`co`]
//! multiplexes kernel console output across streams.

pub mod co;
pub mod device;
pub mod disk;
pub mod stream;
