use gloo_timers::callback::Timeout;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CloseEvent, Event as DomEvent, MessageEvent, WebSocket};

use forge_types::{ClientMessage, ServerMessage};

use crate::automaton::{Effect, Event, ReconnectMachine, ReconnectPolicy, TimerId};
use crate::endpoint::TerminalEndpoint;
use crate::naming::session_name_for;
use crate::session_store::{SessionPicker, SessionStore, Storage, StoreError, StoredSessionRecord};

/// Initialize the WASM module
/// This sets up panic hooks and logging
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
    log::info!("forge terminal client initialized");
}

/// `window.localStorage`
struct LocalStorage;

impl LocalStorage {
    fn storage() -> Result<web_sys::Storage, StoreError> {
        web_sys::window()
            .ok_or_else(|| StoreError::Unavailable("no window".to_string()))?
            .local_storage()
            .map_err(|e| StoreError::Unavailable(format!("{:?}", e)))?
            .ok_or_else(|| StoreError::Unavailable("localStorage disabled".to_string()))
    }
}

impl Storage for LocalStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::storage()?
            .get_item(key)
            .map_err(|e| StoreError::Unavailable(format!("{:?}", e)))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        Self::storage()?
            .set_item(key, value)
            .map_err(|e| StoreError::Unavailable(format!("{:?}", e)))
    }
}

/// Socket plus the handlers that must live as long as it does
struct LiveSocket {
    ws: WebSocket,
    _on_open: Closure<dyn FnMut(DomEvent)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
}

impl LiveSocket {
    fn detach(self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onclose(None);
        let _ = self.ws.close();
    }
}

struct Driver {
    machine: ReconnectMachine,
    socket: Option<(u64, LiveSocket)>,
    generation: u64,
    timers: HashMap<TimerId, Timeout>,
    store: SessionStore<LocalStorage>,
    picker: SessionPicker,
    project_root: Option<String>,
    on_message: Option<js_sys::Function>,
    on_state: Option<js_sys::Function>,
}

type Shared = Rc<RefCell<Driver>>;

fn now() -> u64 {
    js_sys::Date::now() as u64
}

/// Run one event through the automaton and execute its effects
fn dispatch(driver: &Shared, event: Event) {
    let effects = driver.borrow_mut().machine.transition(event);
    for effect in effects {
        apply(driver, effect);
    }
    notify_state(driver);
}

fn apply(driver: &Shared, effect: Effect) {
    match effect {
        Effect::Open { url } => open_socket(driver, &url),
        Effect::Close => {
            if let Some((_, socket)) = driver.borrow_mut().socket.take() {
                socket.detach();
            }
        }
        Effect::StartTimer { id, delay, .. } => {
            let weak = Rc::downgrade(driver);
            let millis = u32::try_from(delay.as_millis()).unwrap_or(u32::MAX);
            let timeout = Timeout::new(millis, move || {
                if let Some(driver) = weak.upgrade() {
                    driver.borrow_mut().timers.remove(&id);
                    dispatch(&driver, Event::TimerFired(id));
                }
            });
            driver.borrow_mut().timers.insert(id, timeout);
        }
        Effect::CancelTimer(id) => {
            if let Some(timeout) = driver.borrow_mut().timers.remove(&id) {
                timeout.cancel();
            }
        }
    }
}

fn open_socket(driver: &Shared, url: &str) {
    let previous = driver.borrow_mut().socket.take();
    if let Some((_, socket)) = previous {
        socket.detach();
    }

    log::info!("Connecting to {}", url);
    let ws = match WebSocket::new(url) {
        Ok(ws) => ws,
        Err(e) => {
            log::error!("Failed to create WebSocket: {:?}", e);
            let weak = Rc::downgrade(driver);
            // Report asynchronously so the failure goes through the automaton
            Timeout::new(0, move || {
                if let Some(driver) = weak.upgrade() {
                    dispatch(&driver, Event::Closed);
                }
            })
            .forget();
            return;
        }
    };

    let generation = {
        let mut d = driver.borrow_mut();
        d.generation += 1;
        d.generation
    };

    let on_open = {
        let weak = Rc::downgrade(driver);
        Closure::wrap(Box::new(move |_: DomEvent| {
            if let Some(driver) = current(&weak, generation) {
                dispatch(&driver, Event::Opened);
            }
        }) as Box<dyn FnMut(DomEvent)>)
    };

    let on_message = {
        let weak = Rc::downgrade(driver);
        Closure::wrap(Box::new(move |event: MessageEvent| {
            let Some(driver) = current(&weak, generation) else {
                return;
            };
            if let Some(text) = event.data().as_string() {
                handle_frame(&driver, &text);
            }
        }) as Box<dyn FnMut(MessageEvent)>)
    };

    let on_close = {
        let weak = Rc::downgrade(driver);
        Closure::wrap(Box::new(move |event: CloseEvent| {
            let Some(driver) = current(&weak, generation) else {
                return;
            };
            log::info!("WebSocket closed: code {}", event.code());
            dispatch(&driver, Event::Closed);
        }) as Box<dyn FnMut(CloseEvent)>)
    };

    ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));
    ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
    ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

    driver.borrow_mut().socket = Some((
        generation,
        LiveSocket {
            ws,
            _on_open: on_open,
            _on_message: on_message,
            _on_close: on_close,
        },
    ));
}

/// The driver, if `generation` is still its current socket
fn current(weak: &Weak<RefCell<Driver>>, generation: u64) -> Option<Shared> {
    let driver = weak.upgrade()?;
    let is_current = matches!(&driver.borrow().socket, Some((g, _)) if *g == generation);
    is_current.then_some(driver)
}

fn handle_frame(driver: &Shared, text: &str) {
    dispatch(driver, Event::Activity(now()));

    match serde_json::from_str::<ServerMessage>(text) {
        Ok(ServerMessage::Session {
            session_id,
            restored,
        }) => {
            log::info!("Attached to session {} (restored: {})", session_id, restored);
            remember_session(driver, &session_id);
            driver.borrow_mut().picker.assigned();
            dispatch(driver, Event::SessionAssigned { id: session_id });
            send(driver, &ClientMessage::Ready);
        }
        Ok(_) => {}
        Err(e) => log::warn!("Unrecognized server message: {}", e),
    }

    let callback = driver.borrow().on_message.clone();
    if let Some(callback) = callback {
        match js_sys::JSON::parse(text) {
            Ok(value) => {
                if let Err(e) = callback.call1(&JsValue::NULL, &value) {
                    log::error!("onMessage callback failed: {:?}", e);
                }
            }
            Err(e) => log::warn!("Failed to parse frame for callback: {:?}", e),
        }
    }
}

fn remember_session(driver: &Shared, session_id: &str) {
    let d = driver.borrow();
    let timestamp = now();
    let result = match d.store.touch(session_id, timestamp) {
        Ok(true) => Ok(()),
        Ok(false) => d.store.upsert(StoredSessionRecord {
            session_id: session_id.to_string(),
            session_name: d.picker.session_name().to_string(),
            layout: None,
            project_root: d.project_root.clone(),
            created_at: timestamp,
            last_access: timestamp,
        }),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        log::warn!("Failed to persist session record: {}", e);
    }
}

fn send(driver: &Shared, message: &ClientMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Failed to serialize: {}", e);
            return false;
        }
    };

    let sent = {
        let d = driver.borrow();
        match &d.socket {
            Some((_, socket)) if socket.ws.ready_state() == WebSocket::OPEN => {
                socket.ws.send_with_str(&json).is_ok()
            }
            _ => false,
        }
    };
    if sent {
        dispatch(driver, Event::Activity(now()));
    } else {
        log::debug!("Dropping message, socket not open");
    }
    sent
}

fn notify_state(driver: &Shared) {
    let (callback, snapshot) = {
        let d = driver.borrow();
        (d.on_state.clone(), d.machine.snapshot())
    };
    let Some(callback) = callback else {
        return;
    };
    let value = serde_json::to_string(&snapshot)
        .ok()
        .and_then(|json| js_sys::JSON::parse(&json).ok());
    if let Some(value) = value {
        if let Err(e) = callback.call1(&JsValue::NULL, &value) {
            log::error!("onStateChange callback failed: {:?}", e);
        }
    }
}

/// Browser terminal client
#[wasm_bindgen]
pub struct TerminalClient {
    driver: Shared,
}

#[wasm_bindgen]
impl TerminalClient {
    /// Client for the page's host; `project` picks the stable session name
    #[wasm_bindgen(constructor)]
    pub fn new(project: Option<String>, runspace: Option<String>) -> Result<TerminalClient, JsValue> {
        let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window object"))?;
        let location = window.location();
        let endpoint =
            TerminalEndpoint::from_page(&location.protocol()?, &location.host()?).with_runspace(runspace);

        let session_name = session_name_for(project.as_deref().unwrap_or(""));
        let mut machine = ReconnectMachine::new(endpoint, ReconnectPolicy::default());
        machine.set_session_name(Some(session_name.clone()));

        let driver = Rc::new(RefCell::new(Driver {
            machine,
            socket: None,
            generation: 0,
            timers: HashMap::new(),
            store: SessionStore::new(LocalStorage),
            picker: SessionPicker::new(session_name),
            project_root: project,
            on_message: None,
            on_state: None,
        }));
        Ok(TerminalClient { driver })
    }

    /// Connect, reattaching to the last session stored under this project's name
    pub fn connect(&self) {
        let remembered = {
            let d = self.driver.borrow();
            d.picker.resume_target(&d.store, d.machine.session_id())
        };
        if let Some(record) = remembered {
            log::info!("Restoring session {}", record.session_id);
            self.driver
                .borrow_mut()
                .machine
                .set_session_id(Some(record.session_id));
        }
        dispatch(&self.driver, Event::Connect);
    }

    /// Reattach to the most recent session stored under `name`
    #[wasm_bindgen(js_name = restoreSession)]
    pub fn restore_session(&self, name: &str) -> bool {
        {
            let mut guard = self.driver.borrow_mut();
            let d = &mut *guard;
            let Some(record) = d.picker.restore(&d.store, name) else {
                return false;
            };
            d.machine.set_session_name(Some(record.session_name));
            d.machine.set_session_id(Some(record.session_id));
        }
        dispatch(&self.driver, Event::Disconnect);
        dispatch(&self.driver, Event::Connect);
        true
    }

    /// Forget the current session; the next connect starts a new one
    #[wasm_bindgen(js_name = newSession)]
    pub fn new_session(&self) {
        dispatch(&self.driver, Event::Disconnect);
        let mut guard = self.driver.borrow_mut();
        let d = &mut *guard;
        let current = d.machine.session_id().map(str::to_string);
        d.picker.start_fresh(&d.store, current.as_deref());
        d.machine.set_session_id(None);
    }

    pub fn disconnect(&self) {
        dispatch(&self.driver, Event::Disconnect);
    }

    #[wasm_bindgen(js_name = sendInput)]
    pub fn send_input(&self, data: String) -> bool {
        send(&self.driver, &ClientMessage::Input { data })
    }

    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        send(&self.driver, &ClientMessage::Resize { cols, rows })
    }

    pub fn execute(&self, command: String) -> bool {
        send(&self.driver, &ClientMessage::Execute { command })
    }

    /// Called with every server message as a plain object
    #[wasm_bindgen(js_name = onMessage)]
    pub fn on_message(&self, callback: js_sys::Function) {
        self.driver.borrow_mut().on_message = Some(callback);
    }

    /// Called with the connection state after every transition
    #[wasm_bindgen(js_name = onStateChange)]
    pub fn on_state_change(&self, callback: js_sys::Function) {
        self.driver.borrow_mut().on_state = Some(callback);
    }

    pub fn state(&self) -> Result<JsValue, JsValue> {
        let snapshot = self.driver.borrow().machine.snapshot();
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| JsValue::from_str(&format!("Failed to serialize: {}", e)))?;
        js_sys::JSON::parse(&json)
    }
}
