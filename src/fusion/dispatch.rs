use crate::track::notify::{ImageSaveRequest, ImageSink, TrackObserver};
use crate::track::{FinalizeEvent, ReportEvent};
use crossbeam::channel::{Receiver, Sender};
use log::{debug, warn};
use std::thread::{spawn, JoinHandle};

type DispatchSenderChannel = Sender<DispatchCommands>;
type DispatchReceiverChannel = Receiver<DispatchCommands>;

enum DispatchCommands {
    Report(ReportEvent),
    Finalize(FinalizeEvent),
    SaveImage(ImageSaveRequest),
    Exit,
}

/// Delivers engine side effects to the collaborators on a dedicated worker thread.
///
/// Enqueueing never blocks. Failures of the collaborators are logged and dropped, nothing is
/// retried. Dropping the dispatcher delivers everything already queued and joins the worker.
///
pub struct Dispatcher {
    tx: DispatchSenderChannel,
    worker: Option<JoinHandle<()>>,
    saves_images: bool,
}

fn dispatch_thread(
    rx: DispatchReceiverChannel,
    mut observer: Box<dyn TrackObserver>,
    mut sink: Option<Box<dyn ImageSink>>,
) {
    while let Ok(command) = rx.recv() {
        match command {
            DispatchCommands::Report(event) => {
                if let Err(e) = observer.on_report(&event) {
                    warn!("Report of track {} is dropped: {}", event.track_id, e);
                }
            }
            DispatchCommands::Finalize(event) => {
                if let Err(e) = observer.on_finalized(&event) {
                    warn!("Final report of track {} is dropped: {}", event.track_id, e);
                }
            }
            DispatchCommands::SaveImage(request) => {
                if let Some(sink) = sink.as_mut() {
                    if let Err(e) = sink.save(&request) {
                        warn!("Image {} is not saved: {}", request.file_name(), e);
                    }
                }
            }
            DispatchCommands::Exit => break,
        }
    }
    debug!("Dispatch thread is finished");
}

impl Dispatcher {
    pub fn new(observer: Box<dyn TrackObserver>, sink: Option<Box<dyn ImageSink>>) -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        let saves_images = sink.is_some();
        let worker = spawn(move || dispatch_thread(rx, observer, sink));
        Self {
            tx,
            worker: Some(worker),
            saves_images,
        }
    }

    /// Whether an image sink is attached; crop requests are not built otherwise.
    ///
    pub fn saves_images(&self) -> bool {
        self.saves_images
    }

    fn send(&self, command: DispatchCommands) {
        if self.tx.send(command).is_err() {
            warn!("Dispatch thread is gone, the side effect is dropped");
        }
    }

    pub fn report(&self, event: ReportEvent) {
        self.send(DispatchCommands::Report(event));
    }

    pub fn finalize(&self, event: FinalizeEvent) {
        self.send(DispatchCommands::Finalize(event));
    }

    pub fn save_image(&self, request: ImageSaveRequest) {
        if self.saves_images {
            self.send(DispatchCommands::SaveImage(request));
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.send(DispatchCommands::Exit);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Dispatch thread panicked");
            }
        }
    }
}
