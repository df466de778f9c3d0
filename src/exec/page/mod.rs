// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use arrow::array::{ArrayRef, RecordBatch};
use arrow::datatypes::SchemaRef;

use crate::common::types::ColumnType;

/// A page of data, the unit moved through an exchange.
/// Wrapper around an Arrow RecordBatch; cloning shares the column buffers.
#[derive(Debug, Clone)]
pub struct Page {
    pub batch: RecordBatch,
}

impl Page {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    /// In-memory footprint used for buffer accounting.
    pub fn byte_size(&self) -> usize {
        self.batch.get_array_memory_size()
    }

    /// Checks column count and types against a declared schema.
    pub fn conforms_to(&self, schema: &[ColumnType]) -> Result<(), String> {
        if self.num_columns() != schema.len() {
            return Err(format!(
                "page has {} column(s), schema declares {}",
                self.num_columns(),
                schema.len()
            ));
        }
        for (idx, (field, expected)) in self
            .batch
            .schema()
            .fields()
            .iter()
            .zip(schema.iter())
            .enumerate()
        {
            if field.data_type() != &expected.to_arrow() {
                return Err(format!(
                    "page column {} ({}) has type {:?}, schema declares {}",
                    idx,
                    field.name(),
                    field.data_type(),
                    expected
                ));
            }
        }
        Ok(())
    }
}

impl From<RecordBatch> for Page {
    fn from(batch: RecordBatch) -> Self {
        Self::new(batch)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn sample_page() -> Page {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
        )
        .unwrap();
        Page::new(batch)
    }

    #[test]
    fn page_reports_shape() {
        let page = sample_page();
        assert_eq!(page.num_rows(), 3);
        assert_eq!(page.num_columns(), 2);
        assert!(!page.is_empty());
        assert!(page.byte_size() > 0);
    }

    #[test]
    fn conforms_to_checks_count_and_types() {
        let page = sample_page();
        assert!(
            page.conforms_to(&[ColumnType::Bigint, ColumnType::Varchar])
                .is_ok()
        );
        assert!(page.conforms_to(&[ColumnType::Bigint]).is_err());
        let err = page
            .conforms_to(&[ColumnType::Bigint, ColumnType::Double])
            .unwrap_err();
        assert!(err.contains("name"));
    }
}
