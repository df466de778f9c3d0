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
use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use pagewire::connector::LocalIpcFileProvider;
use pagewire::exec::pipeline::operator::{PageStream, PageStreamIter};
use pagewire::exec::source::SourceDescriptor;
use pagewire::exec::source_router::SourceRouter;
use pagewire::pagewire_config;
use pagewire::pagewire_logging;

fn print_usage() {
    eprintln!("Usage: pagewire fetch <descriptor.json> [--config <path>]");
    eprintln!("  fetch    - Route a source descriptor and drain its pages");
}

fn init_config_and_logging(config_path: Option<&str>) -> Result<()> {
    match config_path {
        Some(p) => {
            let cfg = pagewire_config::init_from_path(p).context("load pagewire config")?;
            pagewire_logging::init_from_config(cfg);
        }
        // Without a config file every setting keeps its default.
        None => match pagewire_config::init_from_env_or_default() {
            Ok(cfg) => pagewire_logging::init_from_config(cfg),
            Err(_) => pagewire_logging::init(),
        },
    }
    Ok(())
}

fn fetch(descriptor_path: &str) -> Result<()> {
    let descriptor = SourceDescriptor::from_file(Path::new(descriptor_path))?;
    let required_columns = descriptor.required_columns().to_vec();
    let kind = descriptor.kind();

    let router = SourceRouter::from_exec_env(Arc::new(LocalIpcFileProvider::new()))?;
    let stream = router
        .route(descriptor, &required_columns)
        .with_context(|| format!("route {kind} descriptor"))?;
    let name = stream.name().to_string();

    let start = Instant::now();
    let mut iter = PageStreamIter::new(stream);
    for page in iter.by_ref() {
        let page = page.with_context(|| format!("read from {name}"))?;
        pagewire_logging::debug!("page: rows={} bytes={}", page.num_rows(), page.byte_size());
    }
    let (pages, rows) = (iter.seen_pages(), iter.seen_rows());
    let mut stream = iter.into_inner();
    stream.close()?;

    println!(
        "{name}: pages={pages} rows={rows} elapsed_ms={}",
        start.elapsed().as_millis()
    );
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut idx = 1usize;
    let mode = match args.get(idx) {
        Some(m) if !m.starts_with('-') => {
            idx += 1;
            m.as_str()
        }
        _ => "",
    };

    let mut config_path: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    while let Some(arg) = args.get(idx) {
        match arg.as_str() {
            "--config" | "-c" => {
                idx += 1;
                config_path = args.get(idx).cloned();
                if config_path.is_none() {
                    eprintln!("missing value for --config/-c");
                    process::exit(1);
                }
                idx += 1;
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("unknown arg: {other} (try --help)");
                process::exit(1);
            }
            other => {
                positional.push(other.to_string());
                idx += 1;
            }
        }
    }

    match mode {
        "fetch" => {
            let [descriptor_path] = positional.as_slice() else {
                eprintln!("fetch expects exactly one descriptor path (try --help)");
                process::exit(1);
            };
            if let Err(e) = init_config_and_logging(config_path.as_deref()) {
                eprintln!("pagewire: {e:#}");
                process::exit(1);
            }
            if let Err(e) = fetch(descriptor_path) {
                pagewire_logging::error!("fetch failed: {e:#}");
                eprintln!("pagewire: {e:#}");
                process::exit(1);
            }
        }
        "" => {
            print_usage();
            process::exit(1);
        }
        other => {
            eprintln!("unknown command: {other} (try --help)");
            process::exit(1);
        }
    }
}
