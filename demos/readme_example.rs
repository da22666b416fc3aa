extern crate handle_sparse_set;
use handle_sparse_set::{HeapAllocator, ResizableSparseSet, SparseSet};

fn main() -> handle_sparse_set::Result<()> {
    let mut elements = SparseSet::with_capacity(4)?;
    elements.add("1")?;
    let handle2 = elements.add("2")?;
    elements.add("3")?;

    elements.remove(handle2)?;
    let handle4 = elements.add("4")?;

    if !elements.contains(handle2) {
        println!("Value 2 is not in the container");
    }
    // the freed slot is reused
    assert_eq!(handle2, handle4);

    // Prints 1 3 4
    for v in elements.values() {
        print!("{} ", v);
    }
    println!();

    // Prints 1 3 4
    for h in elements.handles() {
        print!("{} ", elements.get(h)?);
    }
    println!();

    let mut growing = ResizableSparseSet::new(HeapAllocator::new());
    let first = growing.add(10)?;
    for value in 11..20 {
        growing.add(value)?;
    }
    // Prints 10 with capacity 15
    println!("{} with capacity {}", growing[first], growing.capacity());

    Ok(())
}
