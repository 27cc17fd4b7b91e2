//! Bridges `IDBRequest` events onto host callbacks.

use crate::error::{host_error, request_error};
use std::cell::RefCell;
use std::rc::Rc;
use stowage_host::{Callback, HostResult};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, IdbRequest};

pub(crate) type Listener = Closure<dyn FnMut(Event)>;

type Read<T> = Box<dyn FnOnce(JsValue) -> HostResult<T>>;

struct Pending<T> {
    callback: Callback<T>,
    read: Read<T>,
    listeners: [Listener; 2],
}

type Slot<T> = Rc<RefCell<Option<Pending<T>>>>;

/// Delivers the outcome of `request` to `callback` exactly once.
///
/// `read` converts the request's result on success. The listeners are
/// released after the first event.
pub(crate) fn listen<T, F>(request: &IdbRequest, callback: Callback<T>, read: F)
where
    T: 'static,
    F: FnOnce(JsValue) -> HostResult<T> + 'static,
{
    let slot: Slot<T> = Rc::new(RefCell::new(None));

    let on_success = {
        let slot = Rc::clone(&slot);
        let request = request.clone();
        Closure::<dyn FnMut(Event)>::new(move |_event: Event| settle(&slot, &request, true))
    };
    let on_error = {
        let slot = Rc::clone(&slot);
        let request = request.clone();
        Closure::<dyn FnMut(Event)>::new(move |_event: Event| settle(&slot, &request, false))
    };
    request.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
    request.set_onerror(Some(on_error.as_ref().unchecked_ref()));

    *slot.borrow_mut() = Some(Pending {
        callback,
        read: Box::new(read),
        listeners: [on_success, on_error],
    });
}

fn settle<T>(slot: &Slot<T>, request: &IdbRequest, succeeded: bool) {
    let Some(pending) = slot.borrow_mut().take() else {
        return;
    };
    request.set_onsuccess(None);
    request.set_onerror(None);

    let Pending {
        callback,
        read,
        listeners,
    } = pending;
    let result = if succeeded {
        request.result().map_err(|e| host_error(&e)).and_then(read)
    } else {
        Err(request_error(request))
    };
    callback(result);
    drop(listeners);
}
