// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

use serde::Serialize;

pub struct YamlFormatter;

impl YamlFormatter {
    pub fn format<T: Serialize + ?Sized>(value: &T) -> String {
        serde_yaml::to_string(value).unwrap_or_else(|_| "[]".to_string())
    }
}
