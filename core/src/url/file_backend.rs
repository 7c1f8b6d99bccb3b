/*
 * file_backend.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gancio, an event-driven network server toolkit.
 *
 * Gancio is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gancio is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gancio.  If not, see <http://www.gnu.org/licenses/>.
 */

//! `file:` transfer backend: downloads read the file, uploads write it.

use std::rc::Rc;

use bytes::Bytes;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::io::memory::SlabSource;
use crate::io::{attach, memory::BufferSink, StreamRef};
use crate::url::transfer::{TransferBackend, TransferResult, UrlTransfer};

pub struct FileBackend;

impl TransferBackend for FileBackend {
    fn scheme_name(&self) -> &'static str {
        "file"
    }

    fn start(&self, transfer: &Rc<UrlTransfer>) {
        let path = transfer.url().path;
        if path.is_empty() {
            transfer.fail(
                TransferResult::BadRequest,
                Error::parse("file URL without a path"),
            );
            return;
        }
        // Upload mode writes the stream out; download mode reads.
        let upload = match transfer.build_request() {
            Ok((_, upload)) => upload,
            Err(e) => {
                transfer.fail(TransferResult::BadRequest, e);
                return;
            }
        };
        match upload {
            Some(upload) => upload_file(transfer, path, upload),
            None => download_file(transfer, path),
        }
    }
}

fn download_file(transfer: &Rc<UrlTransfer>, path: String) {
    let transfer = transfer.clone();
    transfer.clone().handle().spawn(async move {
        if transfer.is_done() {
            return;
        }
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let source = SlabSource::new(Bytes::from(data), None);
                transfer.succeed(None, source as StreamRef);
            }
            Err(e) => {
                transfer.fail(
                    TransferResult::NotFound,
                    Error::resource(format!("reading {}: {}", path, e)),
                );
            }
        }
    });
}

fn upload_file(transfer: &Rc<UrlTransfer>, path: String, upload: StreamRef) {
    // Collect the upload into memory, then write the file as one unit.
    let transfer_done = transfer.clone();
    let path_for_write = path.clone();
    let sink = BufferSink::new(move |collected: &mut Buffer| {
        let data = collected.to_vec();
        let transfer = transfer_done.clone();
        let path = path_for_write.clone();
        transfer.clone().handle().spawn(async move {
            if transfer.is_done() {
                return;
            }
            match tokio::fs::write(&path, &data).await {
                Ok(()) => {
                    let source = SlabSource::new(Bytes::new(), None);
                    transfer.succeed(None, source as StreamRef);
                }
                Err(e) => {
                    transfer.fail(
                        TransferResult::ServerError,
                        Error::resource(format!("writing {}: {}", path, e)),
                    );
                }
            }
        });
    });
    if let Err(e) = attach(upload, sink) {
        transfer.fail(TransferResult::BadRequest, e);
    }
}
