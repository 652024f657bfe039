//! The mark-and-sweep collector.
//!
//! Roots are provided by the caller (module table entries plus live thread state); the collector
//! itself never signals. Marking pushes each newly marked object onto a gray worklist and always
//! also marks the object's type and module; tracing pops the worklist and dispatches on the
//! variant tag; sweeping walks the arena once, clearing the mark and incrementing the life
//! counter of survivors and returning the slots of the dead to the free list.

use crate::heap::{Arena, Heap};
use crate::object::ObjectKind;
use crate::reference::Reference;
use std::collections::VecDeque;
use std::time::Instant;
use tracing::debug;

impl Heap {
    pub(crate) fn collect(&self, roots: &[Reference]) -> usize {
        let started = Instant::now();
        let mut arena = self.arena();
        let mut gray = VecDeque::new();
        let mut marked = 0_usize;

        for root in self.permanent_references() {
            mark(&mut arena, &mut gray, &mut marked, root);
        }
        for root in roots {
            mark(&mut arena, &mut gray, &mut marked, *root);
        }

        // Tracing terminates because every object's mark bit is set at most once; the gray list
        // is bounded by the total number of live objects.
        while let Some(reference) = gray.pop_front() {
            for target in trace_targets(&arena, reference) {
                mark(&mut arena, &mut gray, &mut marked, target);
            }
        }

        let swept = arena.sweep();
        arena.allocations_since_collection = 0;
        drop(arena);

        let duration = started.elapsed();
        let mut stats = self.stats.lock();
        stats.collections += 1;
        stats.objects_marked += marked;
        stats.objects_swept += swept;
        stats.last_collection_duration = Some(duration);
        debug!(
            "collect_garbage: {} roots, {marked} marked, {swept} swept in {duration:?}",
            roots.len()
        );
        swept
    }
}

fn mark(arena: &mut Arena, gray: &mut VecDeque<Reference>, marked: &mut usize, root: Reference) {
    // References owned by another manager or already reclaimed slots are not ours to trace.
    let Ok(object) = arena.get_mut(root) else {
        return;
    };
    let info = object.info_mut();
    if info.marked {
        return;
    }
    info.marked = true;
    *marked += 1;
    gray.push_back(root);
}

fn trace_targets(arena: &Arena, reference: Reference) -> Vec<Reference> {
    let Ok(object) = arena.get(reference) else {
        return Vec::new();
    };
    let mut targets = Vec::new();
    if let Some(class) = object.class() {
        targets.push(class);
    }
    if let Some(module) = object.module() {
        targets.push(module);
    }
    for slot in object.members().values() {
        targets.push(slot.value());
    }
    match object.kind() {
        ObjectKind::Array(items) => targets.extend(items.iter().copied()),
        ObjectKind::Cell(value) => targets.push(*value),
        ObjectKind::TypeParam { value, .. } => targets.extend(value.iter().copied()),
        ObjectKind::Module(module) => targets.extend(module.constant_pool().iter().copied()),
        ObjectKind::Type(class) => {
            targets.extend(class.supers().values().copied());
            targets.extend(class.type_params().values().copied());
        }
        ObjectKind::Method(method) => {
            let template = method.template();
            for variable in template.args().iter().chain(template.locals().iter()) {
                targets.extend(variable.class());
            }
            targets.extend(template.closures().iter().copied());
            for entry in template.exception_table().iter() {
                targets.push(entry.class);
            }
            for table in template.match_tables().iter() {
                targets.extend(table.cases.iter().map(|(key, _)| *key));
            }
            targets.extend(method.type_params().values().copied());
            targets.extend(method.lambdas().iter().copied());
        }
        _ => {}
    }
    targets
}

#[cfg(test)]
mod test {
    use crate::class::{Type, TypeKind};
    use crate::error::Result;
    use crate::heap::{Heap, HeapConfig, MemoryManager};
    use crate::method::{ExceptionEntry, FrameTemplate, MatchTable, Method, Variable};
    use crate::object::{Object, ObjectKind, Slot};
    use std::sync::Arc;
    use velocity_elp::{MethodKind, Sign};

    fn heap() -> Heap {
        Heap::new(HeapConfig::default())
    }

    // The null, true and false singletons always survive collection.
    const PERMANENT: usize = 3;

    #[test]
    fn test_unreferenced_objects_are_swept() -> Result<()> {
        let heap = heap();
        for _ in 0..1000 {
            heap.alloc_array(Vec::new())?;
        }
        let mut referenced = Vec::new();
        for _ in 0..10 {
            referenced.push(heap.alloc_array(Vec::new())?);
        }
        let root = heap.alloc_array(referenced)?;

        let swept = heap.collect_garbage(&[root]);
        assert_eq!(1000, swept);
        assert_eq!(PERMANENT + 11, heap.live_objects());
        Ok(())
    }

    #[test]
    fn test_collection_is_idempotent() -> Result<()> {
        let heap = heap();
        let value = heap.alloc_int(7)?;
        let root = heap.alloc_array(vec![value])?;
        heap.alloc_string("garbage")?;

        let first = heap.collect_garbage(&[root]);
        let live_after_first = heap.live_objects();
        let second = heap.collect_garbage(&[root]);
        assert_eq!(1, first);
        assert_eq!(0, second);
        assert_eq!(live_after_first, heap.live_objects());
        Ok(())
    }

    #[test]
    fn test_survivors_unmarked_with_life_incremented() -> Result<()> {
        let heap = heap();
        let value = heap.alloc_int(7)?;
        assert_eq!(0, heap.life(value)?);

        heap.collect_garbage(&[value]);
        assert!(!heap.is_marked(value)?);
        assert_eq!(1, heap.life(value)?);

        heap.collect_garbage(&[value]);
        assert_eq!(2, heap.life(value)?);
        Ok(())
    }

    #[test]
    fn test_members_are_traced() -> Result<()> {
        let heap = heap();
        let value = heap.alloc_int(1)?;
        let object = heap.allocate(Object::new(ObjectKind::Instance))?;
        heap.declare_member(object, "x", Slot::variable(value))?;

        heap.collect_garbage(&[object]);
        assert_eq!(1, heap.int_value(value)?);
        Ok(())
    }

    #[test]
    fn test_class_and_module_edges_are_traced() -> Result<()> {
        let heap = heap();
        let class = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            Sign::parse("test.T").expect("sign"),
            TypeKind::Class,
        ))))?;
        let module = heap.allocate(Object::new(ObjectKind::Module(crate::module::Module::new(
            "test",
            "test.elp".into(),
        ))))?;
        let instance = heap.instantiate(class)?;
        heap.set_module(instance, Some(module))?;

        heap.collect_garbage(&[instance]);
        assert!(!heap.is_marked(class)?);
        assert_eq!(1, heap.life(class)?);
        assert_eq!(1, heap.life(module)?);
        Ok(())
    }

    #[test]
    fn test_type_supers_and_params_are_traced() -> Result<()> {
        let heap = heap();
        let base = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            Sign::parse("test.Base").expect("sign"),
            TypeKind::Class,
        ))))?;
        let bound = heap.allocate(Object::new(ObjectKind::TypeParam {
            name: "T".to_string(),
            value: Some(base),
        }))?;
        let derived = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            Sign::parse("test.Derived[T]").expect("sign"),
            TypeKind::Class,
        ))))?;
        heap.add_super(derived, "test.Base", base)?;
        heap.add_type_param(derived, "T", bound)?;

        heap.collect_garbage(&[derived]);
        assert_eq!(1, heap.life(base)?);
        assert_eq!(1, heap.life(bound)?);
        Ok(())
    }

    #[test]
    fn test_method_template_is_traced() -> Result<()> {
        let heap = heap();
        let arg_class = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            Sign::parse("basic.int").expect("sign"),
            TypeKind::Class,
        ))))?;
        let caught = heap.allocate(Object::new(ObjectKind::Type(Type::new(
            Sign::parse("basic.error").expect("sign"),
            TypeKind::Class,
        ))))?;
        let key = heap.alloc_int(1)?;
        let template = FrameTemplate::new(
            Arc::from(vec![0x22]),
            1,
            vec![Variable::new("x", Some(arg_class))],
            Vec::new(),
            0,
            Vec::new(),
            Arc::from(vec![ExceptionEntry {
                start_pc: 0,
                end_pc: 0,
                handler_pc: 0,
                class: caught,
            }]),
            Arc::from(vec![MatchTable {
                cases: vec![(key, 0)],
                default_location: 0,
            }]),
            Arc::from(Vec::new()),
            Arc::from(Vec::new()),
        );
        let method = heap.allocate(Object::new(ObjectKind::Method(Method::new(
            Sign::parse("test::f(basic.int)").expect("sign"),
            MethodKind::Function,
            template,
        ))))?;

        heap.collect_garbage(&[method]);
        assert_eq!(1, heap.life(arg_class)?);
        assert_eq!(1, heap.life(caught)?);
        assert_eq!(1, heap.life(key)?);
        Ok(())
    }

    #[test]
    fn test_module_pool_is_traced() -> Result<()> {
        let heap = heap();
        let constant = heap.alloc_string("pooled")?;
        let module = heap.allocate(Object::new(ObjectKind::Module(crate::module::Module::new(
            "test",
            "test.elp".into(),
        ))))?;
        heap.set_module_pool(module, Arc::from(vec![constant]))?;

        heap.collect_garbage(&[module]);
        assert_eq!("pooled", heap.string_value(constant)?);
        assert_eq!(1, heap.life(constant)?);
        Ok(())
    }

    #[test]
    fn test_cells_are_traced() -> Result<()> {
        let heap = heap();
        let value = heap.alloc_int(9)?;
        let cell = heap.alloc_cell(value)?;

        heap.collect_garbage(&[cell]);
        assert_eq!(1, heap.life(value)?);
        Ok(())
    }

    #[test]
    fn test_foreign_roots_are_ignored() -> Result<()> {
        let first = heap();
        let second = heap();
        let foreign_root = second.alloc_int(1)?;
        let local = first.alloc_int(2)?;

        // A root owned by another manager is skipped, not an error.
        let swept = first.collect_garbage(&[foreign_root, local]);
        assert_eq!(0, swept);
        assert_eq!(1, first.life(local)?);
        Ok(())
    }

    #[test_log::test]
    fn test_statistics_are_updated() -> Result<()> {
        let heap = heap();
        heap.alloc_int(1)?;
        heap.collect_garbage(&[]);
        let statistics = heap.statistics();
        assert_eq!(1, statistics.collections);
        assert_eq!(1, statistics.objects_swept);
        assert!(statistics.last_collection_duration.is_some());
        Ok(())
    }

    #[test]
    fn test_allocation_counter_resets() -> Result<()> {
        let heap = heap();
        heap.alloc_int(1)?;
        heap.alloc_int(2)?;
        assert_eq!(2, heap.allocations_since_collection());
        heap.collect_garbage(&[]);
        assert_eq!(0, heap.allocations_since_collection());
        Ok(())
    }
}
