use crate::Error::{
    DivisionByZero, IllegalAccess, InternalError, InvalidOperand, NativeLibrary, Throw,
};
use crate::Result;
use crate::foreign::ForeignLoader;
use crate::frame::Frame;
use crate::safepoint::Safepoint;
use crate::settings::Settings;
use crate::state::VmState;
use crate::thread::{Thread, ThreadStatus};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use tracing::{Level, debug, error, event_enabled};
use velocity_elp::Sign;
use velocity_loader::{Loader, ModuleRegistry};
use velocity_object::{
    Foreign, Heap, MemoryManager, Object, ObjectKind, ObjectTag, Reference, Slot,
};

/// How a single dispatched instruction continues.
#[derive(Debug, PartialEq)]
enum Control {
    /// Proceed to the next instruction.
    Continue,
    /// Pop the active frame and hand the value to the caller.
    Return(Reference),
    /// Terminate the thread with the given exit code.
    Halt(i32),
}

/// The outcome of invoking a callable.
enum CallOutcome {
    /// A frame was pushed; the dispatch loop continues in the callee.
    FramePushed,
    /// The callable produced a value without a frame (foreign calls, type instantiation).
    Value(Reference),
}

/// The Velocity virtual machine.
///
/// The orchestrator owns the heap manager, the module table, the thread set, the safepoint
/// barrier, the output sink and the exit hooks. Execution state is per thread and passed
/// explicitly through the dispatch functions; the process-wide thread table serves diagnostics
/// and foreign-callback re-entry only.
pub struct Vm {
    settings: Settings,
    heap: Arc<Heap>,
    modules: ModuleRegistry,
    loader: Loader,
    threads: Mutex<Vec<Arc<Thread>>>,
    safepoint: Safepoint,
    gc_lock: Mutex<()>,
    gc_requested: AtomicBool,
    foreign_loader: RwLock<Option<Arc<dyn ForeignLoader>>>,
    on_exit: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    out: Mutex<String>,
    next_thread_id: AtomicU64,
}

impl Vm {
    /// Create a new VM with the given settings.
    #[must_use]
    pub fn new(settings: Settings) -> Arc<Vm> {
        let heap = Arc::new(Heap::new(settings.heap_config().clone()));
        let loader = Loader::new(settings.module_path().clone());
        Arc::new(Vm {
            settings,
            heap,
            modules: ModuleRegistry::new(),
            loader,
            threads: Mutex::new(Vec::new()),
            safepoint: Safepoint::new(),
            gc_lock: Mutex::new(()),
            gc_requested: AtomicBool::new(false),
            foreign_loader: RwLock::new(None),
            on_exit: Mutex::new(Vec::new()),
            out: Mutex::new(String::new()),
            next_thread_id: AtomicU64::new(1),
        })
    }

    /// The VM settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The memory manager of this VM.
    #[must_use]
    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// The module table.
    #[must_use]
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// The loader.
    #[must_use]
    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// The threads of this VM, in creation order.
    #[must_use]
    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.threads.lock().clone()
    }

    /// The VM executing on the calling host thread, if any.
    #[must_use]
    pub fn current() -> Option<Arc<Vm>> {
        Thread::current()?.vm()
    }

    /// Install the loader used to resolve foreign callables.
    pub fn set_foreign_loader(&self, loader: Arc<dyn ForeignLoader>) {
        *self.foreign_loader.write() = Some(loader);
    }

    /// Register an action to run when the VM terminates.
    pub fn on_exit<F: FnOnce() + Send + 'static>(&self, action: F) {
        self.on_exit.lock().push(Box::new(action));
    }

    /// Append text to the VM output.
    pub fn write(&self, text: &str) {
        self.out.lock().push_str(text);
    }

    /// Whatever has been written to the output.
    #[must_use]
    pub fn output(&self) -> String {
        self.out.lock().clone()
    }

    /// Start the VM from a module file: read, verify, load, find the entry method by the
    /// configured entry signature, and run it on a fresh thread with the command-line arguments.
    ///
    /// # Errors
    /// Returns a load error, or `IllegalAccess` if the module has no callable entry point.
    pub fn start(self: &Arc<Self>, path: &Path, args: &[String]) -> Result<i32> {
        let module = self.loader.load_file(&self.heap, &self.modules, path)?;
        let module_name = self.heap.module_name(module)?;
        let entry_point = self.settings.entry_point();
        let entry = self.heap.get_member(module, entry_point).map_err(|_| {
            IllegalAccess(format!(
                "no entry point '{entry_point}' in module '{module_name}'"
            ))
        })?;
        if !self.heap.is_callable(entry)? {
            return Err(IllegalAccess(format!(
                "entry point '{entry_point}' in module '{module_name}' is not callable"
            )));
        }
        let args = self.args_repr(args)?;
        self.start_method(entry, args)
    }

    /// Start the VM from an already loaded entry method and an argument array, wait for the
    /// initial thread to terminate, run the exit hooks, and return the thread's exit code.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn start_method(self: &Arc<Self>, entry: Reference, args: Reference) -> Result<i32> {
        let call_args = self.entry_args(entry, args)?;
        let thread = self.spawn_thread(entry, call_args)?;
        thread.join()?;
        let exit_code = thread.exit_code();
        self.run_exit_hooks();
        Ok(exit_code)
    }

    /// An entry method declaring no formal arguments is invoked without the argument array.
    fn entry_args(&self, entry: Reference, args: Reference) -> Result<Vec<Reference>> {
        if self.heap.tag(entry)? == ObjectTag::Method
            && self.heap.method_template(entry)?.args().is_empty()
        {
            return Ok(Vec::new());
        }
        Ok(vec![args])
    }

    /// Convert host strings to the argument array handed to the entry method.
    fn args_repr(&self, args: &[String]) -> Result<Reference> {
        let mut elements = Vec::with_capacity(args.len());
        for arg in args {
            elements.push(self.heap.alloc_string(arg.clone())?);
        }
        Ok(self.heap.alloc_array(elements)?)
    }

    /// Spawn a VM thread whose body invokes the callable. The constructor blocks until the
    /// thread is registered in the process-wide table, so user code always sees itself through
    /// `Thread::current()`.
    fn spawn_thread(self: &Arc<Self>, entry: Reference, args: Vec<Reference>) -> Result<Arc<Thread>> {
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        // The thread's object representation roots the entry callable and its arguments for the
        // window before the first frame exists.
        let mut represented = vec![entry];
        represented.extend(args.iter().copied());
        let value = self.heap.alloc_array(represented)?;
        let thread = Arc::new(Thread::new(id, Arc::downgrade(self), value));
        self.threads.lock().push(thread.clone());

        let (ready_sender, ready_receiver) = mpsc::channel();
        let vm = self.clone();
        let body_thread = thread.clone();
        let handle = std::thread::Builder::new()
            .name(format!("velocity-{id}"))
            .spawn(move || {
                Thread::register_current(body_thread.clone());
                vm.safepoint.register_mutator();
                body_thread.set_status(ThreadStatus::Running);
                let _ = ready_sender.send(());

                let mut state = VmState::new(vm.settings.stack_depth());
                match vm.invoke(&body_thread, &mut state, entry, args) {
                    Ok(_) => {}
                    Err(Throw(value)) => {
                        let rendered = vm
                            .heap
                            .to_display_string(value)
                            .unwrap_or_else(|_| "<unrenderable>".to_string());
                        error!("thread {id} terminated by uncaught throw: {rendered}");
                        if body_thread.exit_code() == 0 {
                            body_thread.set_exit_code(1);
                        }
                    }
                    Err(failure) => {
                        error!("thread {id} terminated: {failure}");
                        if body_thread.exit_code() == 0 {
                            body_thread.set_exit_code(1);
                        }
                    }
                }

                body_thread.set_status(ThreadStatus::Terminated);
                body_thread.clear_published_roots();
                vm.safepoint.deregister_mutator();
                Thread::deregister_current();
            })
            .map_err(|failure| InternalError(format!("failed to spawn thread: {failure}")))?;
        thread.set_join_handle(handle);
        ready_receiver
            .recv()
            .map_err(|_| InternalError("thread failed to start".to_string()))?;
        Ok(thread)
    }

    /// Invoke a callable on the given thread state and run it to completion, returning its
    /// result. The null object stands in for a void return.
    ///
    /// # Errors
    /// Returns `Throw` if an exception escapes the callable, or a fatal error.
    pub fn invoke(
        &self,
        thread: &Arc<Thread>,
        state: &mut VmState,
        callable: Reference,
        args: Vec<Reference>,
    ) -> Result<Reference> {
        let base = state.depth();
        match self.call(state, callable, args)? {
            CallOutcome::Value(value) => Ok(value),
            CallOutcome::FramePushed => self.run_to_depth(thread, state, base),
        }
    }

    /// Invoke a callable: validate the call site, then either push a frame (methods) or produce
    /// a value directly (foreign calls and type instantiation).
    fn call(
        &self,
        state: &mut VmState,
        callable: Reference,
        args: Vec<Reference>,
    ) -> Result<CallOutcome> {
        // Call-site validation: the active manager must own the callable.
        if callable.manager() != self.heap.id() {
            return Err(IllegalAccess(format!(
                "invalid call site, cannot call object owned by manager {}",
                callable.manager()
            )));
        }

        match self.heap.tag(callable)? {
            ObjectTag::Method => {
                if event_enabled!(Level::DEBUG) {
                    let sign = self.heap.callable_sign(callable)?;
                    debug!("invoke: {sign}");
                }
                let template = self.heap.method_template(callable)?;
                let frame = Frame::new(&self.heap, callable, &template, args)?;
                state.push_frame(frame)?;
                Ok(CallOutcome::FramePushed)
            }
            ObjectTag::Foreign => {
                let foreign = self.heap.foreign(callable)?;
                let loader = self.foreign_loader.read().clone().ok_or_else(|| {
                    NativeLibrary {
                        library: foreign.library().to_string(),
                        function: foreign.function().to_string(),
                        reason: "no foreign loader installed".to_string(),
                    }
                })?;
                let function = loader.resolve(foreign.library(), foreign.function())?;
                let result = function(self, &args)?;
                Ok(CallOutcome::Value(result))
            }
            ObjectTag::Type => {
                let instance = self.heap.instantiate(callable)?;
                Ok(CallOutcome::Value(instance))
            }
            tag => Err(InvalidOperand {
                expected: "callable".to_string(),
                actual: tag.name().to_string(),
            }),
        }
    }

    /// The VM execution loop: dispatch opcodes against the thread's active frame until the call
    /// stack empties.
    ///
    /// # Errors
    /// Returns `Throw` for an exception that escapes the bottom frame, or a fatal error.
    pub fn run(&self, thread: &Arc<Thread>, state: &mut VmState) -> Result<Reference> {
        self.run_to_depth(thread, state, 0)
    }

    fn run_to_depth(
        &self,
        thread: &Arc<Thread>,
        state: &mut VmState,
        base: usize,
    ) -> Result<Reference> {
        let mut last_return = self.heap.null();
        while state.depth() > base {
            self.safepoint.poll(thread, state);
            match self.step(thread, state) {
                Ok(Control::Continue) => {}
                Ok(Control::Return(value)) => {
                    state.pop_frame();
                    if state.depth() > base {
                        state.push(value)?;
                    } else {
                        last_return = value;
                    }
                }
                Ok(Control::Halt(exit_code)) => {
                    thread.set_exit_code(exit_code);
                    while state.pop_frame() {}
                    return Ok(self.heap.null());
                }
                Err(Throw(value)) => self.unwind(state, value, base)?,
                Err(failure) => return Err(failure),
            }
        }
        Ok(last_return)
    }

    /// Fetch, decode and execute a single instruction.
    fn step(&self, thread: &Arc<Thread>, state: &mut VmState) -> Result<Control> {
        let opcode = state.read_byte()?;
        match opcode {
            // nop
            0x00 => {}
            // const
            0x01 => {
                let index = state.read_short()?;
                let value = state.load_const(&self.heap, index)?;
                state.push(value)?;
            }
            // pop
            0x02 => {
                state.pop()?;
            }
            // dup
            0x03 => {
                let value = state.peek()?;
                state.push(value)?;
            }
            // load_local
            0x04 => {
                let index = usize::from(state.read_short()?);
                let frame = state.frame()?;
                let raw = frame.local(index)?;
                let value = if index >= frame.closure_start() {
                    self.heap.cell_value(raw)?
                } else {
                    raw
                };
                state.push(value)?;
            }
            // store_local
            0x05 => {
                let index = usize::from(state.read_short()?);
                let value = state.pop()?;
                let frame = state.frame_mut()?;
                if index >= frame.closure_start() {
                    let cell = frame.local(index)?;
                    self.heap.set_cell_value(cell, value)?;
                } else {
                    frame.set_local(index, value)?;
                }
            }
            // load_arg
            0x06 => {
                let index = usize::from(state.read_short()?);
                let value = state.frame()?.arg(index)?;
                state.push(value)?;
            }
            // store_arg
            0x07 => {
                let index = usize::from(state.read_short()?);
                let value = state.pop()?;
                state.frame_mut()?.set_arg(index, value)?;
            }
            // load_global
            0x08 => {
                let index = state.read_short()?;
                let sign = self.constant_sign(state, index)?;
                let value = self.get_symbol_sign(&sign)?;
                state.push(value)?;
            }
            // store_global
            0x09 => {
                let index = state.read_short()?;
                let sign = self.constant_sign(state, index)?;
                let value = state.pop()?;
                self.modules.set_symbol(&self.heap, &sign, value)?;
            }
            // get_member
            0x0a => {
                let index = state.read_short()?;
                let name = self.constant_string(state, index)?;
                let object = state.pop()?;
                let value = self.heap.get_member(object, &name)?;
                state.push(value)?;
            }
            // set_member
            0x0b => {
                let index = state.read_short()?;
                let name = self.constant_string(state, index)?;
                let value = state.pop()?;
                let object = state.pop()?;
                self.heap.set_member(object, &name, value)?;
            }
            // new_array
            0x0c => {
                let count = usize::from(state.read_short()?);
                let mut items = vec![self.heap.null(); count];
                for index in (0..count).rev() {
                    items[index] = state.pop()?;
                }
                let array = self.heap.alloc_array(items)?;
                state.push(array)?;
            }
            // array_load
            0x0d => {
                let index = self.heap.int_value(state.pop()?)?;
                let array = state.pop()?;
                let value = self.heap.array_get(array, index)?;
                state.push(value)?;
            }
            // array_store
            0x0e => {
                let value = state.pop()?;
                let index = self.heap.int_value(state.pop()?)?;
                let array = state.pop()?;
                self.heap.array_set(array, index, value)?;
            }
            // array_length
            0x0f => {
                let array = state.pop()?;
                let length = self.heap.array_length(array)?;
                let value = self
                    .heap
                    .alloc_int(i64::try_from(length).unwrap_or(i64::MAX))?;
                state.push(value)?;
            }
            // add / sub / mul / div / rem
            0x10..=0x14 => {
                let right = state.pop()?;
                let left = state.pop()?;
                let result = self.arithmetic(opcode, left, right)?;
                state.push(result)?;
            }
            // neg
            0x15 => {
                let value = state.pop()?;
                let result = match self.heap.tag(value)? {
                    ObjectTag::Int => self.heap.alloc_int(self.heap.int_value(value)?.wrapping_neg())?,
                    ObjectTag::Float => self.heap.alloc_float(-self.heap.float_value(value)?)?,
                    tag => {
                        return Err(InvalidOperand {
                            expected: "numeric operand".to_string(),
                            actual: tag.name().to_string(),
                        });
                    }
                };
                state.push(result)?;
            }
            // eq / ne
            0x16 | 0x17 => {
                let right = state.pop()?;
                let left = state.pop()?;
                let equal = self.heap.equals(left, right)?;
                let value = if opcode == 0x16 { equal } else { !equal };
                state.push(self.heap.boolean(value))?;
            }
            // lt / le / gt / ge
            0x18..=0x1b => {
                let right = state.pop()?;
                let left = state.pop()?;
                let ordering = self.compare(left, right)?;
                let value = match opcode {
                    0x18 => ordering.is_lt(),
                    0x19 => ordering.is_le(),
                    0x1a => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                state.push(self.heap.boolean(value))?;
            }
            // not
            0x1c => {
                let value = state.pop()?;
                let truth = self.heap.truth(value)?;
                state.push(self.heap.boolean(!truth))?;
            }
            // jump
            0x1d => {
                let offset = read_displacement(state)?;
                state.adjust(offset)?;
            }
            // jump_if_true
            0x1e => {
                let offset = read_displacement(state)?;
                let condition = state.pop()?;
                if self.heap.truth(condition)? {
                    state.adjust(offset)?;
                }
            }
            // jump_if_false
            0x1f => {
                let offset = read_displacement(state)?;
                let condition = state.pop()?;
                if !self.heap.truth(condition)? {
                    state.adjust(offset)?;
                }
            }
            // call
            0x20 => {
                // Collect before the callee and arguments leave the rooted operand stack.
                self.maybe_collect(thread, state);
                let count = usize::from(state.read_byte()?);
                let mut args = vec![self.heap.null(); count];
                for index in (0..count).rev() {
                    args[index] = state.pop()?;
                }
                let callable = state.pop()?;
                if let CallOutcome::Value(value) = self.call(state, callable, args)? {
                    state.push(value)?;
                }
            }
            // return
            0x21 => {
                let value = state.pop()?;
                return Ok(Control::Return(value));
            }
            // return_null
            0x22 => {
                return Ok(Control::Return(self.heap.null()));
            }
            // throw
            0x23 => {
                let value = state.pop()?;
                return Err(Throw(value));
            }
            // match
            0x24 => {
                let index = state.read_short()?;
                let scrutinee = state.pop()?;
                let target = {
                    let frame = state.frame()?;
                    let table = frame.match_table(index)?;
                    let mut target = table.default_location;
                    for (key, location) in &table.cases {
                        if self.heap.equals(scrutinee, *key)? {
                            target = *location;
                            break;
                        }
                    }
                    target
                };
                let target = usize::try_from(target)
                    .map_err(|_| InternalError("match target out of range".to_string()))?;
                state.set_pc(target)?;
            }
            // print
            0x25 => {
                let value = state.pop()?;
                let rendered = self.heap.to_display_string(value)?;
                self.write(&rendered);
            }
            // halt
            0x26 => {
                let value = state.pop()?;
                let exit_code = self.heap.int_value(value)?;
                return Ok(Control::Halt(
                    i32::try_from(exit_code).unwrap_or(i32::MAX),
                ));
            }
            _ => {
                return Err(InternalError(format!("invalid opcode {opcode:#04x}")));
            }
        }
        Ok(Control::Continue)
    }

    fn arithmetic(&self, opcode: u8, left: Reference, right: Reference) -> Result<Reference> {
        let left_tag = self.heap.tag(left)?;
        let right_tag = self.heap.tag(right)?;

        // String concatenation rides the add opcode.
        if opcode == 0x10 && left_tag == ObjectTag::String && right_tag == ObjectTag::String {
            let mut value = self.heap.string_value(left)?;
            value.push_str(&self.heap.string_value(right)?);
            return Ok(self.heap.alloc_string(value)?);
        }

        if left_tag == ObjectTag::Int && right_tag == ObjectTag::Int {
            let left = self.heap.int_value(left)?;
            let right = self.heap.int_value(right)?;
            let value = match opcode {
                0x10 => left.wrapping_add(right),
                0x11 => left.wrapping_sub(right),
                0x12 => left.wrapping_mul(right),
                0x13 => {
                    if right == 0 {
                        return Err(DivisionByZero);
                    }
                    left.wrapping_div(right)
                }
                _ => {
                    if right == 0 {
                        return Err(DivisionByZero);
                    }
                    left.wrapping_rem(right)
                }
            };
            return Ok(self.heap.alloc_int(value)?);
        }

        let left = self.number(left, left_tag)?;
        let right = self.number(right, right_tag)?;
        let value = match opcode {
            0x10 => left + right,
            0x11 => left - right,
            0x12 => left * right,
            0x13 => left / right,
            _ => left % right,
        };
        Ok(self.heap.alloc_float(value)?)
    }

    fn compare(&self, left: Reference, right: Reference) -> Result<std::cmp::Ordering> {
        let left_tag = self.heap.tag(left)?;
        let right_tag = self.heap.tag(right)?;
        if left_tag == ObjectTag::String && right_tag == ObjectTag::String {
            return Ok(self
                .heap
                .string_value(left)?
                .cmp(&self.heap.string_value(right)?));
        }
        if left_tag == ObjectTag::Int && right_tag == ObjectTag::Int {
            return Ok(self.heap.int_value(left)?.cmp(&self.heap.int_value(right)?));
        }
        let left = self.number(left, left_tag)?;
        let right = self.number(right, right_tag)?;
        left.partial_cmp(&right).ok_or(InvalidOperand {
            expected: "comparable operands".to_string(),
            actual: "NaN".to_string(),
        })
    }

    fn number(&self, reference: Reference, tag: ObjectTag) -> Result<f64> {
        match tag {
            ObjectTag::Int => Ok(self.heap.int_value(reference)? as f64),
            ObjectTag::Float => self.heap.float_value(reference).map_err(Into::into),
            _ => Err(InvalidOperand {
                expected: "numeric operand".to_string(),
                actual: tag.name().to_string(),
            }),
        }
    }

    /// Unwind a thrown value: search the active frame's exception table for a handler covering
    /// the current pc whose declared type is a super of the thrown value's type; otherwise pop
    /// the frame and retry. An unhandled throw at `base` propagates to the caller.
    fn unwind(&self, state: &mut VmState, value: Reference, base: usize) -> Result<()> {
        let thrown_class = self.heap.class_of(value)?;
        loop {
            if state.depth() == base {
                return Err(Throw(value));
            }
            let handler = {
                let frame = state.frame()?;
                let pc = u32::try_from(frame.pc())
                    .map_err(|_| InternalError("program counter out of range".to_string()))?;
                frame.handler_for(&self.heap, pc, thrown_class)?
            };
            match handler {
                Some(handler_pc) => {
                    let frame = state.frame_mut()?;
                    frame.clear_stack();
                    frame.push(value)?;
                    frame.set_pc(usize::try_from(handler_pc).map_err(|_| {
                        InternalError("handler offset out of range".to_string())
                    })?)?;
                    return Ok(());
                }
                None => {
                    state.pop_frame();
                }
            }
        }
    }

    fn constant_string(&self, state: &VmState, index: u16) -> Result<String> {
        let reference = state.frame()?.constant(index)?;
        Ok(self.heap.string_value(reference)?)
    }

    fn constant_sign(&self, state: &VmState, index: u16) -> Result<Sign> {
        let text = self.constant_string(state, index)?;
        Ok(Sign::parse(text)?)
    }

    /// Resolve a sign to a value.
    ///
    /// # Errors
    /// Returns `IllegalAccess` if the symbol cannot be found.
    pub fn get_symbol(&self, sign: &str) -> Result<Reference> {
        let sign = Sign::parse(sign)?;
        self.get_symbol_sign(&sign)
    }

    fn get_symbol_sign(&self, sign: &Sign) -> Result<Reference> {
        self.lookup_symbol_sign(sign)?
            .ok_or_else(|| IllegalAccess(format!("symbol not found: {sign}")))
    }

    /// Resolve a sign to a value; `None` when the symbol cannot be found.
    ///
    /// # Errors
    /// Returns an error if the heap rejects a dereference.
    pub fn lookup_symbol(&self, sign: &str) -> Result<Option<Reference>> {
        let sign = Sign::parse(sign)?;
        self.lookup_symbol_sign(&sign)
    }

    fn lookup_symbol_sign(&self, sign: &Sign) -> Result<Option<Reference>> {
        // Cross-module symbols resolve lazily: the first lookup of an unloaded module pulls it
        // in from the module path.
        let module_name = sign.module_name();
        if !module_name.is_empty() && self.modules.get(&module_name).is_none() {
            match self.loader.load_module(&self.heap, &self.modules, &module_name) {
                Ok(_) => {}
                Err(velocity_loader::Error::ModuleNotFound(_)) => return Ok(None),
                Err(failure) => return Err(failure.into()),
            }
        }
        Ok(self.modules.lookup(&self.heap, sign)?)
    }

    /// Set the value of the symbol the sign names.
    ///
    /// # Errors
    /// Returns an error if the symbol's scope cannot be found or the slot refuses the store.
    pub fn set_symbol(&self, sign: &str, value: Reference) -> Result<()> {
        let sign = Sign::parse(sign)?;
        self.modules.set_symbol(&self.heap, &sign, value)?;
        Ok(())
    }

    /// Declare a foreign callable in a loaded module: the coordinates are stored, resolution
    /// happens on first call through the installed foreign loader.
    ///
    /// # Errors
    /// Returns `IllegalAccess` if the sign's module is not loaded.
    pub fn define_foreign(
        &self,
        sign: &str,
        library: &str,
        function: &str,
    ) -> Result<Reference> {
        let sign = Sign::parse(sign)?;
        let module = self
            .modules
            .get(&sign.module_name())
            .ok_or_else(|| IllegalAccess(format!("module not loaded: {}", sign.module_name())))?;
        let name = sign.name().to_string();
        let foreign = Foreign::new(sign, library, function);
        let reference = self
            .heap
            .allocate(Object::new(ObjectKind::Foreign(foreign)).with_module(module))?;
        self.heap
            .declare_member(module, &name, Slot::constant(reference))?;
        Ok(reference)
    }

    /// Create a throw signal carrying a string message; the host and foreign callables use this
    /// to raise exceptions that unwind like user throws.
    #[must_use]
    pub fn runtime_error(&self, message: &str) -> crate::Error {
        match self.heap.alloc_string(message) {
            Ok(value) => Throw(value),
            Err(failure) => failure.into(),
        }
    }

    /// Trigger a collection from the host: immediate when no mutator is running, otherwise
    /// deferred to the next safe point.
    pub fn collect(&self) {
        if self.safepoint.mutators() == 0 {
            let _guard = self.gc_lock.lock();
            let mut roots = self.modules.roots();
            for thread in self.threads.lock().iter() {
                roots.push(thread.value());
            }
            self.heap.collect_garbage(&roots);
        } else {
            self.gc_requested.store(true, Ordering::Release);
        }
    }

    /// Collect at a safe point on a mutator thread: rendezvous with every other mutator, gather
    /// roots from the module table and all thread state, and run the collector synchronously on
    /// the calling thread.
    pub fn collect_garbage(&self, thread: &Arc<Thread>, state: &VmState) {
        // A concurrent trigger parks this thread instead of collecting twice.
        let Some(_guard) = self.gc_lock.try_lock() else {
            self.safepoint.poll(thread, state);
            return;
        };
        self.safepoint.begin(true);
        let mut roots = self.modules.roots();
        for other in self.threads.lock().iter() {
            roots.push(other.value());
            if other.id() == thread.id() {
                roots.extend(state.roots());
            } else {
                roots.extend(other.published_roots());
            }
        }
        self.heap.collect_garbage(&roots);
        self.safepoint.end();
    }

    fn maybe_collect(&self, thread: &Arc<Thread>, state: &VmState) {
        let threshold = self.heap.config().collection_threshold;
        let threshold_reached =
            threshold > 0 && self.heap.allocations_since_collection() >= threshold;
        if self.gc_requested.swap(false, Ordering::AcqRel) || threshold_reached {
            self.collect_garbage(thread, state);
        }
    }

    fn run_exit_hooks(&self) {
        let hooks = std::mem::take(&mut *self.on_exit.lock());
        for hook in hooks {
            hook();
        }
    }
}

fn read_displacement(state: &mut VmState) -> Result<i32> {
    let raw = state.read_short()?;
    Ok(i32::from(i16::from_be_bytes(raw.to_be_bytes())))
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("settings", &self.settings)
            .field("modules", &self.modules.len())
            .field("threads", &self.threads.lock().len())
            .finish_non_exhaustive()
    }
}
